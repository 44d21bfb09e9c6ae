/// Parsed command lines: stages joined by `|`, optional `<` / `>`
/// redirection, and an optional trailing `&`.
///
/// Words are split with shell quoting rules via `shlex`. Operators need no
/// surrounding space (`<in`, `>out`, `a|b`, `cmd&`) and lose their meaning
/// when quoted or escaped.
use std::path::PathBuf;

/// One stage of a pipeline: the executable followed by its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub argv: Vec<String>,
}

impl Command {
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub commands: Vec<Command>,
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub background: bool,
    /// The line as typed, minus surrounding whitespace and any `&`.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    UnbalancedQuotes,
    EmptyCommand,
    MissingRedirectTarget(char),
    DuplicateRedirect(char),
    MisplacedAmpersand,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::UnbalancedQuotes => write!(f, "Unmatched quote."),
            ParseError::EmptyCommand => write!(f, "Invalid null command."),
            ParseError::MissingRedirectTarget(op) => write!(f, "Missing name for redirect '{op}'."),
            ParseError::DuplicateRedirect(op) => write!(f, "Ambiguous redirect '{op}'."),
            ParseError::MisplacedAmpersand => write!(f, "'&' may only appear at the end of a line."),
        }
    }
}

impl std::error::Error for ParseError {}

enum Token {
    Word(String),
    Pipe,
    Input,
    Output,
    Background,
}

/// Split `line` into words and operators.
///
/// Operators are recognized only outside quotes and escapes, so `'|'` and
/// `\&` are ordinary words. The text between operators is split into words
/// by `shlex`, which also reports unbalanced quotes.
fn tokenize(line: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut segment = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in line.chars() {
        if escaped {
            escaped = false;
        } else {
            match (quote, c) {
                (Some('\''), '\'') => quote = None,
                (Some('\''), _) => {}
                (_, '\\') => escaped = true,
                (Some('"'), '"') => quote = None,
                (Some(_), _) => {}
                (None, '\'' | '"') => quote = Some(c),
                (None, '|' | '<' | '>' | '&') => {
                    push_words(&mut tokens, &segment)?;
                    segment.clear();
                    tokens.push(match c {
                        '|' => Token::Pipe,
                        '<' => Token::Input,
                        '>' => Token::Output,
                        _ => Token::Background,
                    });
                    continue;
                }
                (None, _) => {}
            }
        }
        segment.push(c);
    }
    push_words(&mut tokens, &segment)?;
    Ok(tokens)
}

fn push_words(tokens: &mut Vec<Token>, segment: &str) -> Result<(), ParseError> {
    let words = shlex::split(segment).ok_or(ParseError::UnbalancedQuotes)?;
    tokens.extend(words.into_iter().map(Token::Word));
    Ok(())
}

impl Pipeline {
    /// Parse one command line. The caller has already skipped empty lines.
    pub fn parse(line: &str) -> Result<Pipeline, ParseError> {
        let tokens = tokenize(line)?;
        let mut commands = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut input = None;
        let mut output = None;
        let mut background = false;

        let mut iter = tokens.into_iter().peekable();
        while let Some(token) = iter.next() {
            if background {
                return Err(ParseError::MisplacedAmpersand);
            }
            match token {
                Token::Word(w) => current.push(w),
                Token::Pipe => {
                    if current.is_empty() {
                        return Err(ParseError::EmptyCommand);
                    }
                    commands.push(Command {
                        argv: std::mem::take(&mut current),
                    });
                }
                Token::Input | Token::Output => {
                    let (op, slot) = match token {
                        Token::Input => ('<', &mut input),
                        _ => ('>', &mut output),
                    };
                    let path = match iter.next() {
                        Some(Token::Word(w)) if !w.is_empty() => PathBuf::from(w),
                        _ => return Err(ParseError::MissingRedirectTarget(op)),
                    };
                    if slot.replace(path).is_some() {
                        return Err(ParseError::DuplicateRedirect(op));
                    }
                }
                Token::Background => background = true,
            }
        }

        if current.is_empty() {
            return Err(ParseError::EmptyCommand);
        }
        commands.push(Command { argv: current });

        let mut text = line.trim();
        if background {
            text = text.trim_end_matches('&').trim_end();
        }

        Ok(Pipeline {
            commands,
            input,
            output,
            background,
            text: text.to_string(),
        })
    }
}
