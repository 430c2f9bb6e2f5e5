//! Builds the single invocation string a command-line re-parser splits
//! back into a program path and arguments.
//!
//! The quoting convention is a wire-compatibility requirement and must be
//! reproduced exactly: a token containing none of space, tab, newline,
//! vertical tab, form feed or double quote is copied verbatim; any other
//! token is wrapped in double quotes with every embedded quote doubled.
//! Backslashes are never used as an escape. An empty token is rendered as
//! the two-character pair `""` so it survives re-splitting. Tokens are
//! joined with single spaces, program path first.

/// Characters that force a token into quoted form.
const NEEDS_QUOTING: &[char] = &[' ', '\t', '\n', '\x0b', '\x0c', '"'];

/// Append one token to the line, quoting per the convention above.
fn push_token(out: &mut String, token: &str) {
    if token.is_empty() {
        out.push_str("\"\"");
    } else if token.contains(NEEDS_QUOTING) {
        out.push('"');
        for c in token.chars() {
            out.push(c);
            if c == '"' {
                out.push('"');
            }
        }
        out.push('"');
    } else {
        out.push_str(token);
    }
}

/// Build the full invocation string for `program` and `args`.
pub fn build<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    let mut out = String::with_capacity(
        program.len() + args.iter().map(|a| a.as_ref().len() + 3).sum::<usize>() + 2,
    );
    push_token(&mut out, program);
    for arg in args {
        out.push(' ');
        push_token(&mut out, arg.as_ref());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Re-split a line by the native convention: whitespace separates
    /// tokens outside quotes, a doubled quote inside a quoted region is a
    /// literal quote.
    fn resplit(line: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut started = false;
        let mut in_quotes = false;
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '"' if in_quotes => {
                    if chars.peek() == Some(&'"') {
                        let _ = chars.next();
                        current.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                '"' => {
                    in_quotes = true;
                    started = true;
                }
                ' ' | '\t' if !in_quotes => {
                    if started {
                        tokens.push(std::mem::take(&mut current));
                        started = false;
                    }
                }
                c => {
                    current.push(c);
                    started = true;
                }
            }
        }
        if started {
            tokens.push(current);
        }
        tokens
    }

    #[test]
    fn plain_tokens_verbatim() {
        let line = build("prog", &["-a", "--long=value", "path/to/file"]);
        assert_eq!(line, "prog -a --long=value path/to/file");
    }

    #[test]
    fn whitespace_forces_quotes() {
        assert_eq!(build("prog", &["two words"]), "prog \"two words\"");
        assert_eq!(build("prog", &["tab\there"]), "prog \"tab\there\"");
        assert_eq!(build("prog", &["line\nbreak"]), "prog \"line\nbreak\"");
    }

    #[test]
    fn quotes_are_doubled_not_backslashed() {
        assert_eq!(build("prog", &["say \"hi\""]), "prog \"say \"\"hi\"\"\"");
        assert!(!build("prog", &["\""]).contains('\\'));
    }

    #[test]
    fn empty_token_survives() {
        let line = build("prog", &[""]);
        assert_eq!(line, "prog \"\"");
        assert_eq!(resplit(&line), vec!["prog".to_owned(), String::new()]);
    }

    #[test]
    fn program_with_spaces_is_quoted() {
        let line = build("C:/Program Files/tool", &["-v"]);
        assert_eq!(line, "\"C:/Program Files/tool\" -v");
    }

    #[test]
    fn round_trip_recovers_arguments() {
        let args = [
            "simple",
            "two words",
            "",
            "with\"quote",
            "\"leading and trailing\"",
            "mix \"of\tall\"",
        ];
        let line = build("prog", &args);
        let mut expected = vec!["prog".to_owned()];
        expected.extend(args.iter().map(|s| (*s).to_owned()));
        assert_eq!(resplit(&line), expected);
    }
}
