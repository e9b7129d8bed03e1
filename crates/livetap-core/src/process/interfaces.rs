/// Parse the interface listing printed by `tshark -D`.
///
/// Lines look like `1. eth0` or `3. lo (Loopback)`; the index and the
/// parenthesised description are dropped.
///
/// # Examples
/// ```
/// use livetap_core::parse_interface_list;
///
/// let names = parse_interface_list("1. eth0\n2. lo (Loopback)\n");
/// assert_eq!(names, vec!["eth0", "lo"]);
/// ```
pub fn parse_interface_list(output: &str) -> Vec<String> {
    output.lines().filter_map(parse_interface_line).collect()
}

fn parse_interface_line(line: &str) -> Option<String> {
    let (index, rest) = line.trim().split_once(". ")?;
    if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let name = match rest.find(" (") {
        Some(pos) if rest.ends_with(')') => &rest[..pos],
        _ => rest,
    };
    let name = name.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
