use crate::errors::PocScanError;
use super::CmpOp;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Str(String),
    Num(f64),
    Ident(String),
    True,
    False,
    LParen,
    RParen,
    And,
    Or,
    Not,
    Cmp(CmpOp),
    Matches,
}

pub fn tokenize(input: &str) -> Result<Vec<Token>, PocScanError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' | '|' => {
                if chars.get(i + 1) != Some(&c) {
                    return Err(syntax_error(input, i, &format!("expected '{}{}'", c, c)));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
                i += 2;
            }
            '=' => {
                if chars.get(i + 1) != Some(&'=') {
                    return Err(syntax_error(input, i, "expected '=='"));
                }
                tokens.push(Token::Cmp(CmpOp::Eq));
                i += 2;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Cmp(CmpOp::Ne));
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '>' | '<' => {
                let with_eq = chars.get(i + 1) == Some(&'=');
                let op = match (c, with_eq) {
                    ('>', true) => CmpOp::Ge,
                    ('>', false) => CmpOp::Gt,
                    ('<', true) => CmpOp::Le,
                    _ => CmpOp::Lt,
                };
                tokens.push(Token::Cmp(op));
                i += if with_eq { 2 } else { 1 };
            }
            '"' | '\'' => {
                let (literal, next) = read_string(input, &chars, i)?;
                tokens.push(Token::Str(literal));
                i = next;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).map_or(false, |n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text.parse::<f64>()
                    .map_err(|_| syntax_error(input, start, &format!("invalid number '{}'", text)))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(keyword_or_ident(word));
            }
            other => {
                return Err(syntax_error(input, i, &format!("unexpected character '{}'", other)));
            }
        }
    }

    Ok(tokens)
}

fn keyword_or_ident(word: String) -> Token {
    match word.as_str() {
        "true" => Token::True,
        "false" => Token::False,
        "contains" => Token::Cmp(CmpOp::Contains),
        "icontains" => Token::Cmp(CmpOp::IContains),
        "startswith" => Token::Cmp(CmpOp::StartsWith),
        "endswith" => Token::Cmp(CmpOp::EndsWith),
        "matches" => Token::Matches,
        _ => Token::Ident(word),
    }
}

fn read_string(input: &str, chars: &[char], start: usize) -> Result<(String, usize), PocScanError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let escaped = chars.get(i + 1)
                    .ok_or_else(|| syntax_error(input, i, "dangling escape"))?;
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    // Keep regex escapes such as \d intact
                    c if *c == quote || *c == '\\' => out.push(*c),
                    c => {
                        out.push('\\');
                        out.push(*c);
                    }
                }
                i += 2;
            }
            c if c == quote => return Ok((out, i + 1)),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(syntax_error(input, start, "unterminated string literal"))
}

fn syntax_error(input: &str, pos: usize, msg: &str) -> PocScanError {
    PocScanError::RuleDefinition(format!("{} at offset {} in expression `{}`", msg, pos, input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_comparison_chain() {
        let tokens = tokenize(r#"status >= 200 && body contains "ok""#).unwrap();
        assert_eq!(tokens, vec![
            Token::Ident("status".into()),
            Token::Cmp(CmpOp::Ge),
            Token::Num(200.0),
            Token::And,
            Token::Ident("body".into()),
            Token::Cmp(CmpOp::Contains),
            Token::Str("ok".into()),
        ]);
    }

    #[test]
    fn test_tokenize_not_versus_ne() {
        let tokens = tokenize("!a != b").unwrap();
        assert_eq!(tokens, vec![
            Token::Not,
            Token::Ident("a".into()),
            Token::Cmp(CmpOp::Ne),
            Token::Ident("b".into()),
        ]);
    }

    #[test]
    fn test_string_escapes_keep_regex_classes() {
        let tokens = tokenize(r#"'it\'s' "\d+\"""#).unwrap();
        assert_eq!(tokens, vec![Token::Str("it's".into()), Token::Str("\\d+\"".into())]);
    }

    #[test]
    fn test_dotted_identifier() {
        let tokens = tokenize("header.content_type").unwrap();
        assert_eq!(tokens, vec![Token::Ident("header.content_type".into())]);
    }

    #[test]
    fn test_negative_number() {
        assert_eq!(tokenize("-5").unwrap(), vec![Token::Num(-5.0)]);
    }

    #[test]
    fn test_rejects_single_ampersand_and_assignment() {
        assert!(tokenize("a & b").is_err());
        assert!(tokenize("a = b").is_err());
        assert!(tokenize("a ~ b").is_err());
        assert!(tokenize("\"open").is_err());
    }
}
