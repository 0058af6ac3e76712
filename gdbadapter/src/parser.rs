/// GDB/MI output parser
///
/// Turns single lines of GDB/MI output into typed records.

use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::types::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Empty or prompt line")]
    NotARecord,
    #[error("Unknown GDB/MI output format: {0}")]
    UnknownFormat(String),
    #[error("Malformed {what}: {line}")]
    Malformed { what: &'static str, line: String },
    #[error("Unexpected input in result list: {0}")]
    Syntax(String),
}

type Result<T> = std::result::Result<T, ParseError>;

static RESULT_RECORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)?\^(done|running|connected|error|exit)(?:,(.*))?$")
        .unwrap_or_else(|e| panic!("result record pattern: {e}"))
});

static ASYNC_RECORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)?([*+=])([a-zA-Z0-9_-]+)(?:,(.*))?$")
        .unwrap_or_else(|e| panic!("async record pattern: {e}"))
});

/// True for the `(gdb)` prompt that terminates each burst of output
pub fn is_prompt(line: &str) -> bool {
    line.trim() == "(gdb)"
}

/// Parse a line of GDB/MI output
pub fn parse_gdb_output(line: &str) -> Result<GdbOutput> {
    let line = line.trim();

    if line.is_empty() || is_prompt(line) {
        return Err(ParseError::NotARecord);
    }

    if let Some(stream) = parse_stream_record(line) {
        return Ok(GdbOutput::Stream(stream));
    }

    if let Some(caps) = RESULT_RECORD.captures(line) {
        let class = match &caps[2] {
            "done" => ResultClass::Done,
            "running" => ResultClass::Running,
            "connected" => ResultClass::Connected,
            "error" => ResultClass::Error,
            _ => ResultClass::Exit,
        };
        return Ok(GdbOutput::Result(GdbResult {
            token: parse_token(caps.get(1).map(|m| m.as_str()), line)?,
            class,
            results: parse_optional_results(caps.get(3).map(|m| m.as_str()))?,
        }));
    }

    if let Some(caps) = ASYNC_RECORD.captures(line) {
        let kind = match &caps[2] {
            "*" => AsyncKind::Exec,
            "+" => AsyncKind::Status,
            _ => AsyncKind::Notify,
        };
        return Ok(GdbOutput::Async(AsyncRecord {
            token: parse_token(caps.get(1).map(|m| m.as_str()), line)?,
            kind,
            class: caps[3].to_string(),
            results: parse_optional_results(caps.get(4).map(|m| m.as_str()))?,
        }));
    }

    Err(ParseError::UnknownFormat(line.to_string()))
}

fn parse_token(token: Option<&str>, line: &str) -> Result<Option<u32>> {
    token
        .map(|t| {
            t.parse().map_err(|_| ParseError::Malformed {
                what: "token",
                line: line.to_string(),
            })
        })
        .transpose()
}

fn parse_optional_results(input: Option<&str>) -> Result<HashMap<String, Value>> {
    match input {
        Some(input) => parse_results(input),
        None => Ok(HashMap::new()),
    }
}

/// Parse a stream record (console, target, or log output)
fn parse_stream_record(line: &str) -> Option<StreamRecord> {
    let mut chars = line.chars();
    let stream_type = match chars.next()? {
        '~' => StreamType::Console,
        '@' => StreamType::Target,
        '&' => StreamType::Log,
        _ => return None,
    };

    let body = chars.as_str();
    let content = parse_c_string(body).unwrap_or_else(|| body.to_string());

    Some(StreamRecord {
        stream_type,
        content,
    })
}

/// Parse a comma separated `key=value` list
fn parse_results(input: &str) -> Result<HashMap<String, Value>> {
    let mut cursor = ValueCursor::new(input);
    let mut results = HashMap::new();

    loop {
        cursor.skip_spaces();
        if cursor.at_end() {
            break;
        }

        let (key, value) = cursor.result()?;
        results.insert(key, value);

        if !cursor.eat(',') && !cursor.at_end() {
            return Err(ParseError::Syntax(input.to_string()));
        }
    }

    Ok(results)
}

/// Character cursor over an MI result list
struct ValueCursor<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> ValueCursor<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }

    fn at_end(&mut self) -> bool {
        self.chars.peek().is_none()
    }

    fn skip_spaces(&mut self) {
        while self.chars.next_if_eq(&' ').is_some() {}
    }

    fn eat(&mut self, expected: char) -> bool {
        self.chars.next_if_eq(&expected).is_some()
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(ParseError::Syntax(format!("expected '{}'", expected)))
        }
    }

    /// `key=value`
    fn result(&mut self) -> Result<(String, Value)> {
        let key = self.identifier()?;
        self.expect('=')?;
        let value = self.value()?;
        Ok((key, value))
    }

    fn identifier(&mut self) -> Result<String> {
        let mut identifier = String::new();
        while let Some(ch) = self
            .chars
            .next_if(|&ch| ch.is_alphanumeric() || ch == '_' || ch == '-')
        {
            identifier.push(ch);
        }

        if identifier.is_empty() {
            return Err(ParseError::Syntax("empty identifier".into()));
        }
        Ok(identifier)
    }

    fn value(&mut self) -> Result<Value> {
        match self.chars.peek() {
            Some('"') => {
                self.chars.next();
                Ok(Value::String(self.quoted()))
            }
            Some('[') => {
                self.chars.next();
                self.list()
            }
            Some('{') => {
                self.chars.next();
                self.tuple()
            }
            _ => Err(ParseError::Syntax("expected value".into())),
        }
    }

    /// Body of a C string after its opening quote
    fn quoted(&mut self) -> String {
        let mut out = String::new();
        while let Some(ch) = self.chars.next() {
            match ch {
                '"' => break,
                '\\' => push_escape(&mut out, self.chars.next()),
                other => out.push(other),
            }
        }
        out
    }

    /// Lists hold either bare values or `key=value` results.
    fn list(&mut self) -> Result<Value> {
        let mut items = Vec::new();
        while !self.eat(']') {
            if self.at_end() {
                return Err(ParseError::Syntax("unterminated list".into()));
            }
            let item = match self.chars.peek() {
                Some('"') | Some('[') | Some('{') => self.value()?,
                _ => {
                    let (key, value) = self.result()?;
                    Value::Tuple(HashMap::from([(key, value)]))
                }
            };
            items.push(item);
            self.eat(',');
        }
        Ok(Value::List(items))
    }

    fn tuple(&mut self) -> Result<Value> {
        let mut tuple = HashMap::new();
        while !self.eat('}') {
            if self.at_end() {
                return Err(ParseError::Syntax("unterminated tuple".into()));
            }
            let (key, value) = self.result()?;
            tuple.insert(key, value);
            self.eat(',');
        }
        Ok(Value::Tuple(tuple))
    }
}

fn push_escape(out: &mut String, escaped: Option<char>) {
    match escaped {
        Some('n') => out.push('\n'),
        Some('t') => out.push('\t'),
        Some('r') => out.push('\r'),
        Some('\\') => out.push('\\'),
        Some('"') => out.push('"'),
        Some(other) => {
            out.push('\\');
            out.push(other);
        }
        None => out.push('\\'),
    }
}

/// Parse a C-style string (removes quotes and handles escape sequences)
fn parse_c_string(input: &str) -> Option<String> {
    let content = input.strip_prefix('"')?.strip_suffix('"')?;
    let mut result = String::with_capacity(content.len());
    let mut chars = content.chars();

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            push_escape(&mut result, chars.next());
        } else {
            result.push(ch);
        }
    }

    Some(result)
}

/// Quote `text` as an MI C string argument
pub fn quote_c_string(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for ch in text.chars() {
        match ch {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            '\r' => quoted.push_str("\\r"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_c_string() {
        assert_eq!(parse_c_string("\"Hello\""), Some("Hello".to_string()));
        assert_eq!(parse_c_string("\"Hello\\nWorld\""), Some("Hello\nWorld".to_string()));
        assert_eq!(parse_c_string("\"Hello\\\\World\""), Some("Hello\\World".to_string()));
        assert_eq!(parse_c_string("\"Hello\\\"World\""), Some("Hello\"World".to_string()));
        assert_eq!(parse_c_string("Hello"), None);
        assert_eq!(parse_c_string("\""), None);
    }

    #[test]
    fn test_quote_c_string() {
        assert_eq!(quote_c_string("monitor ?"), "\"monitor ?\"");
        assert_eq!(quote_c_string("echo \"a\\b\"\n"), "\"echo \\\"a\\\\b\\\"\\n\"");
        let quoted = quote_c_string("say \"hi\"\t\\");
        assert_eq!(parse_c_string(&quoted).as_deref(), Some("say \"hi\"\t\\"));
    }

    #[test]
    fn test_parse_done_with_token() {
        match parse_gdb_output("12^done").unwrap() {
            GdbOutput::Result(result) => {
                assert_eq!(result.token, Some(12));
                assert_eq!(result.class, ResultClass::Done);
                assert!(result.results.is_empty());
                assert_eq!(result.error_message(), None);
            }
            other => panic!("Expected result record, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_message() {
        let line = r#"3^error,msg="Undefined command: \"bogus\".  Try \"help\".""#;
        match parse_gdb_output(line).unwrap() {
            GdbOutput::Result(result) => {
                assert_eq!(result.class, ResultClass::Error);
                assert_eq!(
                    result.error_message(),
                    Some("Undefined command: \"bogus\".  Try \"help\".")
                );
            }
            other => panic!("Expected result record, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_stream_records() {
        let cases = [
            (r#"~"UEFI Rust Debugger.\n""#, StreamType::Console, "UEFI Rust Debugger.\n"),
            (r#"@"target output""#, StreamType::Target, "target output"),
            (r#"&"monitor ?\n""#, StreamType::Log, "monitor ?\n"),
        ];
        for (line, stream_type, content) in cases {
            match parse_gdb_output(line).unwrap() {
                GdbOutput::Stream(stream) => {
                    assert_eq!(stream.stream_type, stream_type);
                    assert_eq!(stream.content, content);
                }
                other => panic!("Expected stream record, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_parse_async_records() {
        match parse_gdb_output(r#"*stopped,reason="signal-received",thread-id="1""#).unwrap() {
            GdbOutput::Async(record) => {
                assert_eq!(record.kind, AsyncKind::Exec);
                assert_eq!(record.class, "stopped");
                assert_eq!(record.results["reason"].as_string(), Some("signal-received"));
            }
            other => panic!("Expected async record, got {:?}", other),
        }

        match parse_gdb_output(r#"=thread-group-added,id="i1""#).unwrap() {
            GdbOutput::Async(record) => {
                assert_eq!(record.kind, AsyncKind::Notify);
                assert_eq!(record.class, "thread-group-added");
            }
            other => panic!("Expected async record, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_nested_values() {
        let results = parse_results(
            r#"bkpt={number="1",thread-groups=["i1"]},frames=[frame={level="0"},frame={level="1"}]"#,
        )
        .unwrap();

        let bkpt = results["bkpt"].as_tuple().unwrap();
        assert_eq!(bkpt["number"].as_string(), Some("1"));
        assert_eq!(bkpt["thread-groups"].as_list().unwrap()[0].as_string(), Some("i1"));

        let frames = results["frames"].as_list().unwrap();
        assert_eq!(frames.len(), 2);
        let second = frames[1].as_tuple().unwrap()["frame"].as_tuple().unwrap();
        assert_eq!(second["level"].as_string(), Some("1"));
    }

    #[test]
    fn test_prompt_and_garbage() {
        assert_eq!(parse_gdb_output("(gdb) "), Err(ParseError::NotARecord));
        assert_eq!(parse_gdb_output(""), Err(ParseError::NotARecord));
        assert!(matches!(
            parse_gdb_output("plain text"),
            Err(ParseError::UnknownFormat(_))
        ));
        assert!(matches!(
            parse_gdb_output(r#"^done,msg="a"junk"#),
            Err(ParseError::Syntax(_))
        ));
    }
}
