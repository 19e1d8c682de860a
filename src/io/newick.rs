use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::{DltError, DltResult};

/// One vertex of a parsed Newick string. `meta` holds the text of a trailing
/// `[...]` comment without the brackets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewickNode {
    pub name: Option<String>,
    pub length: Option<f64>,
    pub meta: Option<String>,
    pub children: Vec<NewickNode>,
}

impl NewickNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn n_leaves(&self) -> usize {
        if self.is_leaf() {
            1
        } else {
            self.children.iter().map(NewickNode::n_leaves).sum()
        }
    }
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

const NAME_STOP: &[u8] = b"(),:;[]";

impl<'a> Parser<'a> {
    fn err<T>(&self, msg: impl Into<String>) -> DltResult<T> {
        Err(DltError::Newick {
            pos: self.pos,
            msg: msg.into(),
        })
    }

    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.bytes.get(self.pos).copied()
    }

    fn subtree(&mut self) -> DltResult<NewickNode> {
        let mut node = NewickNode::default();
        if self.peek() == Some(b'(') {
            self.pos += 1;
            loop {
                node.children.push(self.subtree()?);
                match self.peek() {
                    Some(b',') => self.pos += 1,
                    Some(b')') => {
                        self.pos += 1;
                        break;
                    }
                    Some(c) => return self.err(format!("unexpected '{}' in child list", c as char)),
                    None => return self.err("unterminated child list"),
                }
            }
        }
        node.name = self.name()?;
        self.comment_into(&mut node)?;
        if self.peek() == Some(b':') {
            self.pos += 1;
            node.length = Some(self.number()?);
        }
        self.comment_into(&mut node)?;
        if node.is_leaf() && node.name.is_none() {
            return self.err("leaf without a name");
        }
        Ok(node)
    }

    fn name(&mut self) -> DltResult<Option<String>> {
        match self.peek() {
            Some(b'\'') => {
                // A doubled quote inside a quoted name stands for one quote.
                self.pos += 1;
                let mut raw = Vec::new();
                loop {
                    match self.bytes.get(self.pos) {
                        None => return self.err("unterminated quoted name"),
                        Some(b'\'') if self.bytes.get(self.pos + 1) == Some(&b'\'') => {
                            raw.push(b'\'');
                            self.pos += 2;
                        }
                        Some(b'\'') => break,
                        Some(&c) => {
                            raw.push(c);
                            self.pos += 1;
                        }
                    }
                }
                self.pos += 1;
                Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
            }
            Some(_) => {
                let start = self.pos;
                while self.pos < self.bytes.len() {
                    let c = self.bytes[self.pos];
                    if c.is_ascii_whitespace() || NAME_STOP.contains(&c) {
                        break;
                    }
                    self.pos += 1;
                }
                if start == self.pos {
                    return Ok(None);
                }
                Ok(Some(
                    String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned(),
                ))
            }
            None => Ok(None),
        }
    }

    fn number(&mut self) -> DltResult<f64> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.bytes.len() {
            let c = self.bytes[self.pos];
            if c.is_ascii_digit() || matches!(c, b'.' | b'-' | b'+' | b'e' | b'E') {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("");
        match text.parse::<f64>() {
            Ok(v) => Ok(v),
            Err(_) => {
                self.pos = start;
                self.err(format!("invalid branch length '{text}'"))
            }
        }
    }

    fn comment_into(&mut self, node: &mut NewickNode) -> DltResult<()> {
        while self.peek() == Some(b'[') {
            let start = self.pos + 1;
            while self.pos < self.bytes.len() && self.bytes[self.pos] != b']' {
                self.pos += 1;
            }
            if self.pos >= self.bytes.len() {
                return self.err("unterminated comment");
            }
            let text = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
            self.pos += 1;
            node.meta = Some(match node.meta.take() {
                Some(prev) => format!("{prev} {text}"),
                None => text,
            });
        }
        Ok(())
    }
}

/// Parses a single Newick tree. The trailing `;` is optional.
pub fn parse_newick(text: &str) -> DltResult<NewickNode> {
    let mut p = Parser {
        bytes: text.as_bytes(),
        pos: 0,
    };
    if p.peek().is_none() {
        return p.err("empty tree");
    }
    let root = p.subtree()?;
    if p.peek() == Some(b';') {
        p.pos += 1;
    }
    if p.peek().is_some() {
        return p.err("trailing characters after tree");
    }
    Ok(root)
}

/// Writes `node` back to Newick, terminated by `;`.
pub fn write_newick(node: &NewickNode) -> String {
    let mut out = String::new();
    write_node(node, &mut out);
    out.push(';');
    out
}

fn write_node(node: &NewickNode, out: &mut String) {
    if !node.children.is_empty() {
        out.push('(');
        for (i, c) in node.children.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_node(c, out);
        }
        out.push(')');
    }
    if let Some(name) = &node.name {
        write_name(name, out);
    }
    if let Some(len) = node.length {
        let _ = write!(out, ":{len}");
    }
    if let Some(meta) = &node.meta {
        let _ = write!(out, "[{meta}]");
    }
}

fn write_name(name: &str, out: &mut String) {
    let plain = !name.is_empty()
        && name
            .bytes()
            .all(|c| !c.is_ascii_whitespace() && c != b'\'' && !NAME_STOP.contains(&c));
    if plain {
        out.push_str(name);
    } else {
        out.push('\'');
        out.push_str(&name.replace('\'', "''"));
        out.push('\'');
    }
}

/// Splits a `&&PRIME KEY=VALUE ...` annotation into its tags.
pub fn parse_prime_tags(meta: &str) -> BTreeMap<String, String> {
    let body = meta.trim().strip_prefix("&&PRIME").unwrap_or(meta);
    body.split_whitespace()
        .filter_map(|kv| {
            let (k, v) = kv.split_once('=')?;
            Some((k.to_string(), v.to_string()))
        })
        .collect()
}
