/// Canonical form of a title for equality checks: trimmed, lowercase,
/// whitespace runs collapsed to one space.
///
/// Both the query and every candidate go through this before comparing;
/// the original string is what gets stored and displayed.
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_lowercases_and_collapses() {
        assert_eq!(
            normalize_title("  Attention   Is All\tYou  Need \n"),
            "attention is all you need"
        );
    }

    #[test]
    fn is_idempotent() {
        for input in [
            "",
            "   ",
            "Deep Learning",
            "  MiXeD   case\u{00A0}and unicode ÉCOLE ",
            "ΣΊΣΥΦΟΣ  and  İstanbul",
            "tabs\t\tand\nnewlines",
        ] {
            let once = normalize_title(input);
            assert_eq!(normalize_title(&once), once, "{input:?}");
        }
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(normalize_title(" \t "), "");
    }
}
