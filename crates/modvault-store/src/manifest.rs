//! Module manifest (`go.mod`) parsing and extraction.
//!
//! Only the `module` directive, which declares the module's identity, is
//! kept. `go` and `require` lines are checked for shape so a broken manifest
//! is rejected; other directives are accepted and ignored.

use std::io::{Read, Seek};

use crate::archive::ModuleArchive;
use crate::error::{Result, StoreError};

/// File name of the manifest inside a module.
pub const MANIFEST_NAME: &str = "go.mod";

/// A parsed module manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModFile {
    /// Declared module path, if the file has a `module` directive.
    pub module: Option<String>,
}

/// A manifest pulled out of an archive: raw bytes plus declared identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub raw: Vec<u8>,
    pub declared: Option<String>,
}

impl ModFile {
    /// Parse manifest bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| StoreError::invalid_archive("go.mod is not valid UTF-8"))?;

        let mut file = ModFile::default();
        let mut block: Option<String> = None;

        for (lineno, line) in text.lines().enumerate() {
            let lineno = lineno + 1;
            let code = strip_comment(line);
            let tokens = tokenize(code).map_err(|d| syntax_error(lineno, &d))?;
            if tokens.is_empty() {
                continue;
            }

            if let Some(verb) = &block {
                if tokens == [")"] {
                    block = None;
                    continue;
                }
                file.apply(verb, &tokens, lineno)?;
                continue;
            }

            let (verb, args) = (&tokens[0], &tokens[1..]);
            if args == ["("] {
                block = Some(verb.clone());
                continue;
            }
            if args.first().map(String::as_str) == Some("(") {
                return Err(syntax_error(lineno, "unexpected tokens after '('"));
            }
            file.apply(verb, args, lineno)?;
        }

        if block.is_some() {
            return Err(StoreError::invalid_archive("go.mod: unterminated block"));
        }
        Ok(file)
    }

    fn apply(&mut self, verb: &str, args: &[String], lineno: usize) -> Result<()> {
        match verb {
            "module" => {
                if self.module.is_some() {
                    return Err(syntax_error(lineno, "repeated module directive"));
                }
                let [path] = args else {
                    return Err(syntax_error(lineno, "usage: module module/path"));
                };
                self.module = Some(path.clone());
            }
            "go" if args.len() != 1 => {
                return Err(syntax_error(lineno, "usage: go 1.23"));
            }
            "require" if args.len() != 2 => {
                return Err(syntax_error(lineno, "usage: require module/path v1.2.3"));
            }
            _ => {}
        }
        Ok(())
    }
}

/// Minimal manifest for archives that ship without one.
pub fn synthesize_manifest(module_path: &str) -> Vec<u8> {
    format!("module {module_path}\n").into_bytes()
}

/// Look for `<prefix>go.mod` in the archive and parse its declared path.
///
/// `prefix` is the canonical `"<path>@<version>/"` prefix. An absent
/// manifest is `Ok(None)`; a present but malformed one is an error.
pub fn extract_manifest<R: Read + Seek>(
    archive: &mut ModuleArchive<R>,
    prefix: &str,
    limit: u64,
) -> Result<Option<Manifest>> {
    let name = format!("{prefix}{MANIFEST_NAME}");
    if !archive.contains(&name) {
        return Ok(None);
    }
    let raw = archive.read_entry(&name, limit)?;
    let declared = ModFile::parse(&raw)?.module;
    Ok(Some(Manifest { raw, declared }))
}

fn syntax_error(lineno: usize, detail: &str) -> StoreError {
    StoreError::invalid_archive(format!("go.mod:{lineno}: {detail}"))
}

/// Cut a line at the first `//` that is not inside a quoted string.
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' && q == b'"' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'"' || b == b'`' {
                    quote = Some(b);
                } else if b == b'/' && bytes.get(i + 1) == Some(&b'/') {
                    return &line[..i];
                }
            }
        }
        i += 1;
    }
    line
}

/// Split into whitespace-separated tokens; quoted strings are unquoted.
fn tokenize(code: &str) -> std::result::Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut chars = code.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '(' || c == ')' {
            tokens.push(c.to_string());
            chars.next();
            continue;
        }
        if c == '"' || c == '`' {
            chars.next();
            let mut tok = String::new();
            loop {
                match chars.next() {
                    None => return Err("unterminated quoted string".to_string()),
                    Some(ch) if ch == c => break,
                    Some('\\') if c == '"' => match chars.next() {
                        Some(esc @ ('"' | '\\')) => tok.push(esc),
                        _ => return Err("invalid escape in quoted string".to_string()),
                    },
                    Some(ch) => tok.push(ch),
                }
            }
            tokens.push(tok);
            continue;
        }
        let mut tok = String::new();
        while let Some(&ch) = chars.peek() {
            if ch.is_whitespace() || ch == '(' || ch == ')' || ch == '"' || ch == '`' {
                break;
            }
            tok.push(ch);
            chars.next();
        }
        tokens.push(tok);
    }
    Ok(tokens)
}
