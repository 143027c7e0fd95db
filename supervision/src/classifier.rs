//! Log classification over captured client output.
//!
//! Pure functions: no state, no I/O. Given the combined stdout/stderr of one
//! attempt they pick the lines most likely to explain a failure and derive a
//! short error category for the report.

/// Returned by [`extract_relevant`] when the client wrote nothing at all.
pub const NO_OUTPUT: &str = "No output captured";

/// Category used when no specific failure signature is present.
pub const GENERIC_FAILURE: &str = "Connection failed";

/// Lower-case substrings that mark a line as diagnostically relevant.
const DIAGNOSTIC_KEYWORDS: &[&str] = &[
    "error",
    "warning",
    "verify",
    "auth",
    "failed",
    "cannot",
    "unable",
    "tls error",
    "resolve",
];

/// Failure signatures, checked in order against the upper-cased output.
const SIGNATURES: &[(&[&str], &str)] = &[
    (&["AUTH_FAILED"], "Authentication failed"),
    (&["TLS ERROR", "TLS HANDSHAKE"], "TLS handshake failed"),
    (&["RESOLVE"], "DNS resolution failed"),
];

fn is_diagnostic(line: &str) -> bool {
    let lower = line.to_lowercase();
    DIAGNOSTIC_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

fn last_n(lines: &[&str], n: usize) -> String {
    lines[lines.len().saturating_sub(n)..].join("\n")
}

/// Select the part of `output` most likely to explain a failure.
///
/// Lines containing a diagnostic keyword (case-insensitive) win: the last
/// `tail_lines` of them are returned in their original order. When no line
/// matches, the last `tail_lines` raw lines are returned instead.
pub fn extract_relevant(output: &str, tail_lines: usize) -> String {
    if output.is_empty() {
        return NO_OUTPUT.to_string();
    }

    let all: Vec<&str> = output.lines().collect();
    let relevant: Vec<&str> = all.iter().copied().filter(|l| is_diagnostic(l)).collect();

    if relevant.is_empty() {
        last_n(&all, tail_lines)
    } else {
        last_n(&relevant, tail_lines)
    }
}

/// Derive a human-readable failure category from captured output.
pub fn classify_error(output: &str) -> &'static str {
    let upper = output.to_uppercase();
    SIGNATURES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| upper.contains(n)))
        .map(|(_, category)| *category)
        .unwrap_or(GENERIC_FAILURE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{prefix} line {i}")).collect()
    }

    #[test]
    fn empty_output_gives_sentinel() {
        assert_eq!(extract_relevant("", 0), NO_OUTPUT);
        assert_eq!(extract_relevant("", 10), NO_OUTPUT);
    }

    #[test]
    fn keyword_lines_are_kept_in_order() {
        let mut lines = numbered("plain", 15);
        lines[2] = "Tue Jan 1 ERROR: cannot open file".into();
        lines[7] = "some error while reading".into();
        lines[12] = "ERROR again".into();
        let output = lines.join("\n");

        let excerpt = extract_relevant(&output, 10);
        assert_eq!(
            excerpt,
            "Tue Jan 1 ERROR: cannot open file\nsome error while reading\nERROR again"
        );
    }

    #[test]
    fn keyword_lines_are_tailed() {
        let lines: Vec<String> = (1..=12).map(|i| format!("WARNING {i}")).collect();
        let excerpt = extract_relevant(&lines.join("\n"), 3);
        assert_eq!(excerpt, "WARNING 10\nWARNING 11\nWARNING 12");
    }

    #[test]
    fn falls_back_to_raw_tail_without_keywords() {
        let lines = numbered("ok", 20);
        let excerpt = extract_relevant(&lines.join("\n"), 10);
        let expected = lines[10..].join("\n");
        assert_eq!(excerpt, expected);
        assert_eq!(classify_error(&lines.join("\n")), GENERIC_FAILURE);
    }

    #[test]
    fn never_exceeds_tail_lines() {
        let output = "a error\nb\nc error\nd\ne error\n";
        for n in 0..6 {
            let excerpt = extract_relevant(output, n);
            let count = if excerpt.is_empty() {
                0
            } else {
                excerpt.lines().count()
            };
            assert!(count <= n, "tail {n} returned {count} lines");
        }
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        let output = "Options error: x\nall good\nVERIFY OK: depth=1\nAuthenticate/Decrypt packet";
        assert_eq!(
            extract_relevant(output, 10),
            "Options error: x\nVERIFY OK: depth=1\nAuthenticate/Decrypt packet"
        );
    }

    #[test]
    fn classify_auth_any_case() {
        assert_eq!(classify_error("AUTH_FAILED"), "Authentication failed");
        assert_eq!(
            classify_error("received control message: auth_failed"),
            "Authentication failed"
        );
    }

    #[test]
    fn classify_priority_order() {
        // auth beats tls beats resolve
        assert_eq!(
            classify_error("TLS Error: handshake\nAUTH_FAILED\nRESOLVE: x"),
            "Authentication failed"
        );
        assert_eq!(
            classify_error("RESOLVE: Cannot resolve host\nTLS Error: TLS handshake failed"),
            "TLS handshake failed"
        );
        assert_eq!(
            classify_error("TLS handshake failed"),
            "TLS handshake failed"
        );
        assert_eq!(
            classify_error("RESOLVE: Cannot resolve host address: vpn.example.com"),
            "DNS resolution failed"
        );
        assert_eq!(classify_error(""), GENERIC_FAILURE);
    }

    #[test]
    fn deterministic() {
        let output = "TLS Error: TLS key negotiation failed\nSIGUSR1[soft,tls-error]";
        assert_eq!(extract_relevant(output, 5), extract_relevant(output, 5));
        assert_eq!(classify_error(output), classify_error(output));
    }
}
