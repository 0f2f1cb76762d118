//! View rendering used by `ResponseFactory::view`.
//!
//! Workflow:
//! 1. `ViewFactory::render` resolves the view name to a file under the views directory.
//! 2. `tokenize` splits content into text, escaped echo, raw echo and tag tokens.
//! 3. `parse` builds a tree of `Node`.
//! 4. A view that starts with `{% extends "base" %}` has its top-level blocks
//!    merged into the parent, recursively.
//! 5. `render_nodes` walks the merged tree against a `serde_json::Value` context.
//!
//! Syntax: `{{ user.name }}` (HTML-escaped), `{!! html !!}` (raw),
//! `{% if x %}`/`{% if not x %}`..`{% else %}`..`{% endif %}`,
//! `{% for item in items %}`..`{% endfor %}`, `{% block name %}`..`{% endblock %}`.
use crate::error::{Error, Result};
use crate::settings::TemplateSettings;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)(\{!!.*?!!\}|\{\{.*?\}\}|\{%.*?%\})").expect("valid regex"));

const MAX_INHERITANCE_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Text(String),
    Escaped(String), // {{ expr }}
    Raw(String),     // {!! expr !!}
    Tag(String),     // {% tag %}
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Echo {
        path: String,
        escape: bool,
    },
    If {
        condition: String,
        negate: bool,
        then_body: Vec<Node>,
        else_body: Vec<Node>,
    },
    For {
        var_name: String,
        list_name: String,
        body: Vec<Node>,
    },
    Block {
        name: String,
        body: Vec<Node>,
    },
    Extends(String),
}

pub fn tokenize(content: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut last_end = 0;
    for mat in TOKEN_RE.find_iter(content) {
        if mat.start() > last_end {
            tokens.push(Token::Text(content[last_end..mat.start()].to_string()));
        }
        let m = mat.as_str();
        let raw = m.strip_prefix("{!!").and_then(|r| r.strip_suffix("!!}"));
        let escaped = m.strip_prefix("{{").and_then(|r| r.strip_suffix("}}"));
        let token = if let Some(inner) = raw {
            Token::Raw(inner.trim().to_string())
        } else if let Some(inner) = escaped {
            Token::Escaped(inner.trim().to_string())
        } else {
            let inner = &m[2..m.len() - 2];
            Token::Tag(inner.trim().to_string())
        };
        tokens.push(token);
        last_end = mat.end();
    }
    if last_end < content.len() {
        tokens.push(Token::Text(content[last_end..].to_string()));
    }
    tokens
}

pub fn parse(tokens: &[Token]) -> Vec<Node> {
    let mut idx = 0;
    parse_until(tokens, &mut idx, &[])
}

/// Consume tokens until one of `end_tags` is reached. The end tag itself is left in place.
fn parse_until(tokens: &[Token], idx: &mut usize, end_tags: &[&str]) -> Vec<Node> {
    let mut nodes = Vec::new();
    while *idx < tokens.len() {
        match &tokens[*idx] {
            Token::Text(t) => {
                nodes.push(Node::Text(t.clone()));
                *idx += 1;
            }
            Token::Escaped(path) => {
                nodes.push(Node::Echo {
                    path: path.clone(),
                    escape: true,
                });
                *idx += 1;
            }
            Token::Raw(path) => {
                nodes.push(Node::Echo {
                    path: path.clone(),
                    escape: false,
                });
                *idx += 1;
            }
            Token::Tag(tag) => {
                let t = tag.as_str();
                if end_tags.contains(&t) {
                    break;
                }
                *idx += 1;
                if let Some(rest) = t.strip_prefix("extends ") {
                    nodes.push(Node::Extends(rest.trim().trim_matches('"').to_string()));
                } else if let Some(name) = t.strip_prefix("block ") {
                    let body = parse_until(tokens, idx, &["endblock"]);
                    *idx += 1;
                    nodes.push(Node::Block {
                        name: name.trim().to_string(),
                        body,
                    });
                } else if let Some(cond) = t.strip_prefix("if ") {
                    let then_body = parse_until(tokens, idx, &["else", "endif"]);
                    let mut else_body = Vec::new();
                    if matches!(tokens.get(*idx), Some(Token::Tag(tt)) if tt == "else") {
                        *idx += 1;
                        else_body = parse_until(tokens, idx, &["endif"]);
                    }
                    *idx += 1;
                    let cond = cond.trim();
                    let (negate, condition) = match cond.strip_prefix("not ") {
                        Some(inner) => (true, inner.trim()),
                        None => (false, cond),
                    };
                    nodes.push(Node::If {
                        condition: condition.to_string(),
                        negate,
                        then_body,
                        else_body,
                    });
                } else if let Some(rest) = t.strip_prefix("for ") {
                    let parts: Vec<&str> = rest.split_whitespace().collect();
                    if let [var_name, "in", list_name] = parts.as_slice() {
                        let body = parse_until(tokens, idx, &["endfor"]);
                        *idx += 1;
                        nodes.push(Node::For {
                            var_name: var_name.to_string(),
                            list_name: list_name.to_string(),
                            body,
                        });
                    }
                } else {
                    debug!("Skipping unknown view tag `{}`", t);
                }
            }
        }
    }
    nodes
}

/// Resolve `a.b.0.c` against the context. Numeric segments index arrays.
fn lookup<'a>(path: &str, context: &'a Value) -> Option<&'a Value> {
    path.split('.').try_fold(context, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

/// Replace blocks in `nodes` with the child's definitions of the same name.
fn merge_blocks(nodes: Vec<Node>, blocks: &[(String, Vec<Node>)]) -> Vec<Node> {
    nodes
        .into_iter()
        .map(|node| match node {
            Node::Block { name, body } => {
                let body = match blocks.iter().find(|(n, _)| *n == name) {
                    Some((_, child)) => child.clone(),
                    None => merge_blocks(body, blocks),
                };
                Node::Block { name, body }
            }
            Node::If {
                condition,
                negate,
                then_body,
                else_body,
            } => Node::If {
                condition,
                negate,
                then_body: merge_blocks(then_body, blocks),
                else_body: merge_blocks(else_body, blocks),
            },
            Node::For {
                var_name,
                list_name,
                body,
            } => Node::For {
                var_name,
                list_name,
                body: merge_blocks(body, blocks),
            },
            other => other,
        })
        .collect()
}

pub fn render_nodes(nodes: &[Node], context: &Value) -> String {
    let mut out = String::new();
    for node in nodes {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Echo { path, escape } => {
                if let Some(value) = lookup(path, context) {
                    let text = display(value);
                    if *escape {
                        out.push_str(&escape_html(&text));
                    } else {
                        out.push_str(&text);
                    }
                }
            }
            Node::If {
                condition,
                negate,
                then_body,
                else_body,
            } => {
                let truthy = lookup(condition, context).is_some_and(is_truthy);
                if truthy != *negate {
                    out.push_str(&render_nodes(then_body, context));
                } else {
                    out.push_str(&render_nodes(else_body, context));
                }
            }
            Node::For {
                var_name,
                list_name,
                body,
            } => {
                if let Some(Value::Array(items)) = lookup(list_name, context) {
                    for item in items {
                        let mut local = match context {
                            Value::Object(map) => map.clone(),
                            _ => Map::new(),
                        };
                        local.insert(var_name.clone(), item.clone());
                        out.push_str(&render_nodes(body, &Value::Object(local)));
                    }
                }
            }
            Node::Block { body, .. } => out.push_str(&render_nodes(body, context)),
            Node::Extends(_) => {}
        }
    }
    out
}

/// Resolves view names to templates on disk and renders them.
#[derive(Debug, Clone)]
pub struct ViewFactory {
    dir: PathBuf,
    /// Log every parsed tree.
    debug: bool,
}

impl ViewFactory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ViewFactory {
            dir: dir.into(),
            debug: false,
        }
    }

    pub fn from_settings(settings: &TemplateSettings) -> Self {
        ViewFactory::new(&settings.dir).with_debug(settings.debug)
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `users.show` maps to `<dir>/users/show.html`; names that already
    /// carry an `.html` extension are used as-is.
    pub fn path_for(&self, name: &str) -> PathBuf {
        if name.ends_with(".html") {
            self.dir.join(name)
        } else {
            self.dir.join(format!("{}.html", name.replace('.', "/")))
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    /// Render the view `name` with `data` as its context.
    pub fn render(&self, name: &str, data: &Value) -> Result<String> {
        let nodes = self.compile(name, 0)?;
        Ok(render_nodes(&nodes, data))
    }

    fn load(&self, name: &str) -> Result<String> {
        std::fs::read_to_string(self.path_for(name))
            .map_err(|_| Error::ViewNotFound(name.to_string()))
    }

    /// Parse `name` and fold it into its parent chain.
    fn compile(&self, name: &str, depth: usize) -> Result<Vec<Node>> {
        if depth > MAX_INHERITANCE_DEPTH {
            return Err(Error::ViewNotFound(format!("{} (inheritance too deep)", name)));
        }
        let nodes = parse(&tokenize(&self.load(name)?));
        if self.debug {
            debug!("View `{}` AST: {:?}", name, nodes);
        }

        let parent = nodes.iter().find_map(|node| match node {
            Node::Extends(base) => Some(base.clone()),
            _ => None,
        });
        let Some(parent) = parent else {
            return Ok(nodes);
        };

        let blocks: Vec<(String, Vec<Node>)> = nodes
            .into_iter()
            .filter_map(|node| match node {
                Node::Block { name, body } => Some((name, body)),
                _ => None,
            })
            .collect();
        let base = self.compile(&parent, depth + 1)?;
        Ok(merge_blocks(base, &blocks))
    }
}
