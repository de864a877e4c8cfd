/// Wraps `s` in single quotes for use as one POSIX shell word, escaping any
/// embedded single quote as `'\''` (close quote, escaped literal quote,
/// reopen quote). Every external command built by this module's file and
/// log operations must pass its path arguments through this.
pub fn shell_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_path_is_wrapped_unchanged() {
        assert_eq!(shell_quote("/var/log/agent.log"), "'/var/log/agent.log'");
    }

    #[test]
    fn embedded_single_quote_is_escaped() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn empty_string_quotes_to_empty_pair() {
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn round_trips_through_a_shell_semantics_simulation() {
        // `sh -c "echo <quoted>"` would print exactly the original string
        // followed by a newline. We can't spawn a shell in this crate's own
        // tests, so this asserts the structural invariant the real POSIX
        // shell relies on: the quoted form alternates single-quoted runs
        // with exactly one `\'` per embedded quote, never leaving a literal
        // unescaped `'` inside a quoted run.
        for input in ["", "a b", "a'b", "''", "a'b'c", "no quotes here"] {
            let quoted = shell_quote(input);
            let mut chars = quoted.chars().peekable();
            assert_eq!(chars.next(), Some('\''));
            let mut depth_ok = true;
            let mut rebuilt = String::new();
            while let Some(c) = chars.next() {
                if c == '\'' {
                    if chars.peek() == Some(&'\\') {
                        chars.next();
                        if chars.next() != Some('\'') {
                            depth_ok = false;
                        }
                        if chars.next() != Some('\'') {
                            depth_ok = false;
                        }
                        rebuilt.push('\'');
                    }
                } else {
                    rebuilt.push(c);
                }
            }
            assert!(depth_ok, "malformed quoting for {input:?}: {quoted:?}");
            assert_eq!(rebuilt, input, "round-trip mismatch for {input:?}");
        }
    }
}
