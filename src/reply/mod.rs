//! Provider reply post-processing.

/// Returned in place of a reply when the completion provider fails.
pub const FALLBACK_REPLY: &str =
    "Sorry, I'm having trouble generating a response right now. Please try again.";

/// Trim the raw provider text, then strip `*` and `#` formatting artifacts.
pub fn clean_response(raw: &str) -> String {
    raw.trim().replace(['*', '#'], "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_asterisks_and_hashes() {
        assert_eq!(clean_response("**Hello** #World#"), "Hello World");
    }

    #[test]
    fn trims_before_stripping() {
        assert_eq!(clean_response("  \n## Steps\n1. Reset *now*  \n"), " Steps\n1. Reset now");
    }

    #[test]
    fn leaves_other_characters_alone() {
        let text = "HS code 4203.10 - 95% (verify!) _under_ `x`";
        assert_eq!(clean_response(text), text);
    }

    #[test]
    fn only_artifacts_yields_empty() {
        assert_eq!(clean_response(" *#* "), "");
    }
}
