//! Shell-style word splitting for the trigger command strings.
//!
//! Commands are tokenized once at startup. Quoting and backslash escapes
//! follow the usual shell rules, but command substitution (`$(...)` or
//! backticks) is rejected outright, since the command string may come from
//! an untrusted service file.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WordsError {
    #[error("unterminated {0} quote")]
    UnterminatedQuote(char),
    #[error("command substitution is not allowed")]
    CommandSubstitution,
    #[error("trailing backslash")]
    TrailingBackslash,
}

/// Split a command string into words.
///
/// Whitespace separates words unless quoted. Single quotes preserve their
/// contents literally; double quotes allow `\"`, `\\`, `\$` and `` \` ``
/// escapes. An empty input yields an empty vector.
pub fn split(input: &str) -> Result<Vec<String>, WordsError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(WordsError::UnterminatedQuote('\'')),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\' | '$' | '`')) => current.push(ch),
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => return Err(WordsError::UnterminatedQuote('"')),
                        },
                        Some('`') => return Err(WordsError::CommandSubstitution),
                        Some('$') if chars.peek() == Some(&'(') => {
                            return Err(WordsError::CommandSubstitution)
                        }
                        Some(ch) => current.push(ch),
                        None => return Err(WordsError::UnterminatedQuote('"')),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(ch) => current.push(ch),
                    None => return Err(WordsError::TrailingBackslash),
                }
            }
            '`' => return Err(WordsError::CommandSubstitution),
            '$' if chars.peek() == Some(&'(') => return Err(WordsError::CommandSubstitution),
            ch => {
                in_word = true;
                current.push(ch);
            }
        }
    }

    if in_word {
        words.push(current);
    }
    Ok(words)
}
