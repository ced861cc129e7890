//! Line-oriented shader templates.
//!
//! A template is ordinary GLSL text interleaved with directive lines
//! (`$if`/`$elif`/`$else`, `$for`, `$def` plus its `$ return`) and inline
//! `${..}` substitutions. Directives have no closing token: a block ends at
//! the first non-blank line that is not indented past its opener. The text
//! is parsed once into a tree, then expanded per variant environment.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{Error, EvalError};
use crate::expr::{self, Def, Defs, Expr};
use crate::value::{Env, Value};

#[derive(Debug)]
pub struct Template {
    source: PathBuf,
    nodes: Vec<Node>,
}

#[derive(Debug)]
enum Node {
    Text(TextLine),
    Blank,
    Cond {
        arms: Vec<Arm>,
    },
    Loop {
        var: String,
        iterable: Expr,
        line: usize,
        body: Vec<Node>,
    },
    Def {
        name: String,
        def: Def,
    },
}

#[derive(Debug)]
struct Arm {
    cond: Option<Expr>,
    line: usize,
    body: Vec<Node>,
}

#[derive(Debug)]
struct TextLine {
    line: usize,
    segments: Vec<Segment>,
}

#[derive(Debug)]
enum Segment {
    Text(String),
    Expr(Expr),
}

impl Template {
    /// Parses template text into a tree.
    ///
    /// Every embedded expression is parsed here as well, so a malformed
    /// expression is reported even when its branch would never be taken.
    pub fn parse(text: &str, source: &Path) -> Result<Template, Error> {
        let mut parser = Parser {
            file: source,
            root: Vec::new(),
            stack: Vec::new(),
            pending_blanks: 0,
            pending_def: None,
        };

        for (index, raw) in text.lines().enumerate() {
            parser.line(index + 1, raw)?;
        }

        let nodes = parser.finish()?;
        Ok(Template {
            source: source.to_owned(),
            nodes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.source
    }

    /// Expands the template against one fully resolved environment.
    pub fn expand(&self, env: &Env) -> Result<String, Error> {
        let mut expander = Expander {
            file: &self.source,
            env: env.clone(),
            defs: Defs::new(),
            out: Vec::new(),
        };
        expander.nodes(&self.nodes)?;

        let mut text = expander.out.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        Ok(text)
    }

    /// Identifiers the template needs from its environment.
    pub fn free_variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        collect_free(&self.nodes, &mut Vec::new(), &mut out);
        out
    }
}

fn collect_free(nodes: &[Node], bound: &mut Vec<String>, out: &mut BTreeSet<String>) {
    for node in nodes {
        match node {
            Node::Blank => {}
            Node::Text(text) => {
                for segment in &text.segments {
                    if let Segment::Expr(expr) = segment {
                        expr.free_variables(bound, out);
                    }
                }
            }
            Node::Cond { arms } => {
                for arm in arms {
                    if let Some(cond) = &arm.cond {
                        cond.free_variables(bound, out);
                    }
                    collect_free(&arm.body, bound, out);
                }
            }
            Node::Loop {
                var,
                iterable,
                body,
                ..
            } => {
                iterable.free_variables(bound, out);
                bound.push(var.clone());
                collect_free(body, bound, out);
                bound.pop();
            }
            Node::Def { def, .. } => {
                // the body resolves against its parameters alone
                def.body.free_variables(&def.params, out);
            }
        }
    }
}

struct Parser<'a> {
    file: &'a Path,
    root: Vec<Node>,
    stack: Vec<Frame>,
    pending_blanks: usize,
    pending_def: Option<PendingDef>,
}

struct Frame {
    indent: usize,
    body_indent: Option<usize>,
    nodes: Vec<Node>,
    kind: FrameKind,
}

enum FrameKind {
    Cond {
        arms: Vec<Arm>,
        cond: Option<Expr>,
        cond_line: usize,
        has_else: bool,
    },
    Loop {
        var: String,
        iterable: Expr,
        line: usize,
    },
}

struct PendingDef {
    name: String,
    params: Vec<String>,
    indent: usize,
    line: usize,
}

impl Parser<'_> {
    fn line(&mut self, number: usize, raw: &str) -> Result<(), Error> {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);

        if raw.trim().is_empty() {
            // blank lines are not structural; they attach to wherever the
            // next non-blank line lands
            self.pending_blanks += 1;
            return Ok(());
        }

        let trimmed = raw.trim_start();
        let outer = raw.len() - trimmed.len();

        if let Some(rest) = trimmed.strip_prefix('$') {
            if !rest.starts_with('{') {
                let content = rest.trim_start();
                let indent = outer + (rest.len() - content.len());
                return self.directive(number, indent, content.trim_end());
            }
        }

        self.text(number, raw, outer)
    }

    fn text(&mut self, number: usize, raw: &str, indent: usize) -> Result<(), Error> {
        if let Some(pending) = &self.pending_def {
            return Err(self.syntax(
                number,
                format!("expected '$ return' to complete '$def {}'", pending.name),
            ));
        }

        self.close_blocks(indent)?;
        self.flush_blanks();
        self.note_body_indent(number, indent)?;

        let strip = self.current_strip();
        let segments = self.segments(number, strip_indent(raw, strip))?;
        self.container().push(Node::Text(TextLine {
            line: number,
            segments,
        }));
        Ok(())
    }

    fn directive(&mut self, number: usize, indent: usize, content: &str) -> Result<(), Error> {
        let (word, rest) = split_word(content);

        if let Some(pending) = &self.pending_def {
            if word != "return" {
                return Err(self.syntax(
                    number,
                    format!("expected '$ return' to complete '$def {}'", pending.name),
                ));
            }
        }

        match word {
            "if" => self.open_cond(number, indent, rest),
            "elif" => self.switch_arm(number, indent, rest, false),
            "else" => self.switch_arm(number, indent, rest, true),
            "for" => self.open_loop(number, indent, rest),
            "def" => self.open_def(number, indent, rest),
            "return" => self.close_def(number, indent, rest),
            "" => Err(self.syntax(number, "expected a directive after '$'")),
            other => Err(self.syntax(number, format!("unknown directive '${other}'"))),
        }
    }

    fn open_cond(&mut self, number: usize, indent: usize, rest: &str) -> Result<(), Error> {
        self.close_blocks(indent)?;
        self.flush_blanks();
        self.note_body_indent(number, indent)?;

        let source = self.expect_colon(number, rest)?;
        let cond = self.parse_expr(number, source)?;
        self.stack.push(Frame {
            indent,
            body_indent: None,
            nodes: Vec::new(),
            kind: FrameKind::Cond {
                arms: Vec::new(),
                cond: Some(cond),
                cond_line: number,
                has_else: false,
            },
        });
        Ok(())
    }

    fn switch_arm(
        &mut self,
        number: usize,
        indent: usize,
        rest: &str,
        is_else: bool,
    ) -> Result<(), Error> {
        let keyword = if is_else { "$else" } else { "$elif" };

        let cond = if is_else {
            if rest.trim() != ":" {
                return Err(self.syntax(number, "expected ':' after '$else'"));
            }
            None
        } else {
            let source = self.expect_colon(number, rest)?;
            Some(self.parse_expr(number, source)?)
        };

        // deeper blocks close first; the conditional itself stays open and
        // must sit at exactly the same indentation as its '$if'
        while self.stack.last().map_or(false, |top| top.indent > indent) {
            self.pop_frame()?;
        }
        self.flush_blanks();

        match self.stack.last() {
            Some(frame) if frame.indent == indent => match &frame.kind {
                FrameKind::Cond {
                    has_else,
                    cond_line,
                    ..
                } => {
                    if *has_else {
                        let message = if is_else {
                            "multiple '$else' blocks".to_owned()
                        } else {
                            "'$elif' after '$else'".to_owned()
                        };
                        return Err(self.syntax(number, message));
                    }
                    if is_blank_body(&frame.nodes) {
                        return Err(self.syntax(*cond_line, "expected an indented block"));
                    }
                }
                FrameKind::Loop { .. } => {
                    return Err(
                        self.syntax(number, format!("'{keyword}' without a matching '$if'"))
                    );
                }
            },
            _ => {
                return Err(self.syntax(number, format!("'{keyword}' without a matching '$if'")));
            }
        }

        if let Some(frame) = self.stack.last_mut() {
            let body = std::mem::take(&mut frame.nodes);
            if let FrameKind::Cond {
                arms,
                cond: current,
                cond_line,
                has_else,
            } = &mut frame.kind
            {
                arms.push(Arm {
                    cond: current.take(),
                    line: *cond_line,
                    body,
                });
                *current = cond;
                *cond_line = number;
                if is_else {
                    *has_else = true;
                }
            }
            frame.body_indent = None;
        }
        Ok(())
    }

    fn open_loop(&mut self, number: usize, indent: usize, rest: &str) -> Result<(), Error> {
        self.close_blocks(indent)?;
        self.flush_blanks();
        self.note_body_indent(number, indent)?;

        let header = self.expect_colon(number, rest)?;
        let (var, iterable) = self.parse_loop_header(number, header)?;
        self.stack.push(Frame {
            indent,
            body_indent: None,
            nodes: Vec::new(),
            kind: FrameKind::Loop {
                var,
                iterable,
                line: number,
            },
        });
        Ok(())
    }

    fn open_def(&mut self, number: usize, indent: usize, rest: &str) -> Result<(), Error> {
        self.close_blocks(indent)?;
        self.flush_blanks();
        self.note_body_indent(number, indent)?;

        let decl = self.expect_colon(number, rest)?;
        let (name, params) = self.parse_def_header(number, decl)?;
        self.pending_def = Some(PendingDef {
            name,
            params,
            indent,
            line: number,
        });
        Ok(())
    }

    fn close_def(&mut self, number: usize, indent: usize, rest: &str) -> Result<(), Error> {
        let pending = match self.pending_def.take() {
            Some(pending) => pending,
            None => return Err(self.syntax(number, "'$ return' outside of a '$def' block")),
        };
        if indent <= pending.indent {
            return Err(self.syntax(
                number,
                format!("expected an indented '$ return' after '$def {}'", pending.name),
            ));
        }
        let body = self.parse_expr(number, rest)?;
        self.container().push(Node::Def {
            name: pending.name,
            def: Def {
                params: pending.params,
                body,
            },
        });
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<Node>, Error> {
        if let Some(pending) = self.pending_def.take() {
            return Err(self.syntax(
                pending.line,
                format!("'$def {}' has no '$ return' line", pending.name),
            ));
        }
        while !self.stack.is_empty() {
            self.pop_frame()?;
        }
        self.flush_blanks();
        Ok(self.root)
    }

    fn close_blocks(&mut self, indent: usize) -> Result<(), Error> {
        while self.stack.last().map_or(false, |top| indent <= top.indent) {
            self.pop_frame()?;
        }
        Ok(())
    }

    fn pop_frame(&mut self) -> Result<(), Error> {
        let frame = match self.stack.pop() {
            Some(frame) => frame,
            None => return Ok(()),
        };
        let node = self.finish_frame(frame)?;
        self.container().push(node);
        Ok(())
    }

    fn finish_frame(&self, frame: Frame) -> Result<Node, Error> {
        match frame.kind {
            FrameKind::Cond {
                mut arms,
                cond,
                cond_line,
                ..
            } => {
                if is_blank_body(&frame.nodes) {
                    return Err(self.syntax(cond_line, "expected an indented block"));
                }
                arms.push(Arm {
                    cond,
                    line: cond_line,
                    body: frame.nodes,
                });
                Ok(Node::Cond { arms })
            }
            FrameKind::Loop {
                var,
                iterable,
                line,
            } => {
                if is_blank_body(&frame.nodes) {
                    return Err(self.syntax(line, "expected an indented block"));
                }
                Ok(Node::Loop {
                    var,
                    iterable,
                    line,
                    body: frame.nodes,
                })
            }
        }
    }

    fn container(&mut self) -> &mut Vec<Node> {
        match self.stack.last_mut() {
            Some(frame) => &mut frame.nodes,
            None => &mut self.root,
        }
    }

    fn flush_blanks(&mut self) {
        let count = std::mem::take(&mut self.pending_blanks);
        let container = self.container();
        for _ in 0..count {
            container.push(Node::Blank);
        }
    }

    // the first body line fixes the indentation step stripped from a block
    fn note_body_indent(&mut self, number: usize, indent: usize) -> Result<(), Error> {
        let mismatch = match self.stack.last_mut() {
            Some(frame) => match frame.body_indent {
                None => {
                    frame.body_indent = Some(indent);
                    false
                }
                Some(body) => indent < body,
            },
            None => false,
        };
        if mismatch {
            return Err(self.syntax(number, "unindent does not match the enclosing block"));
        }
        Ok(())
    }

    fn current_strip(&self) -> usize {
        self.stack
            .iter()
            .map(|frame| frame.body_indent.map_or(0, |body| body - frame.indent))
            .sum()
    }

    fn segments(&self, number: usize, text: &str) -> Result<Vec<Segment>, Error> {
        let mut segments = Vec::new();
        let mut rest = text;
        while let Some(start) = rest.find("${") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_owned()));
            }
            let after = &rest[start + 2..];
            let end = match closing_brace(after) {
                Some(end) => end,
                None => return Err(self.syntax(number, "unterminated '${'")),
            };
            segments.push(Segment::Expr(self.parse_expr(number, &after[..end])?));
            rest = &after[end + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_owned()));
        }
        Ok(segments)
    }

    fn parse_loop_header(&self, number: usize, header: &str) -> Result<(String, Expr), Error> {
        let (var, rest) = split_word(header.trim_start());
        if !is_identifier(var) {
            return Err(self.syntax(number, "expected a loop variable after '$for'"));
        }
        let (word, iterable) = split_word(rest.trim_start());
        if word != "in" {
            return Err(self.syntax(number, "expected 'in' after the loop variable"));
        }
        let iterable = self.parse_expr(number, iterable)?;
        Ok((var.to_owned(), iterable))
    }

    fn parse_def_header(&self, number: usize, decl: &str) -> Result<(String, Vec<String>), Error> {
        let (name, rest) = split_word(decl.trim());
        if !is_identifier(name) {
            return Err(self.syntax(number, "expected a name after '$def'"));
        }
        let inner = match rest
            .trim()
            .strip_prefix('(')
            .and_then(|inner| inner.strip_suffix(')'))
        {
            Some(inner) => inner,
            None => {
                return Err(
                    self.syntax(number, format!("expected a parameter list after '{name}'"))
                );
            }
        };

        let mut params = Vec::new();
        if !inner.trim().is_empty() {
            for part in inner.split(',') {
                let part = part.trim();
                if !is_identifier(part) {
                    return Err(self.syntax(number, format!("invalid parameter name '{part}'")));
                }
                params.push(part.to_owned());
            }
        }
        Ok((name.to_owned(), params))
    }

    fn parse_expr(&self, number: usize, source: &str) -> Result<Expr, Error> {
        if source.trim().is_empty() {
            return Err(self.syntax(number, "expected an expression"));
        }
        expr::parse(source).map_err(|error| self.syntax(number, error.to_string()))
    }

    fn expect_colon<'s>(&self, number: usize, rest: &'s str) -> Result<&'s str, Error> {
        match rest.strip_suffix(':') {
            Some(inner) => Ok(inner),
            None => Err(self.syntax(number, "expected ':' at the end of the directive")),
        }
    }

    fn syntax(&self, line: usize, message: impl Into<String>) -> Error {
        Error::Syntax {
            file: self.file.to_owned(),
            line,
            message: message.into(),
        }
    }
}

fn split_word(content: &str) -> (&str, &str) {
    let end = content
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(content.len());
    content.split_at(end)
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_blank_body(nodes: &[Node]) -> bool {
    nodes.iter().all(|node| matches!(node, Node::Blank))
}

fn strip_indent(line: &str, width: usize) -> &str {
    let mut rest = line;
    for _ in 0..width {
        match rest.strip_prefix(' ').or_else(|| rest.strip_prefix('\t')) {
            Some(stripped) => rest = stripped,
            None => break,
        }
    }
    rest
}

// scans for the '}' closing a substitution, skipping quoted strings and
// nested braces such as set literals
fn closing_brace(input: &str) -> Option<usize> {
    let mut depth = 1usize;
    let mut quote = None;
    for (offset, ch) in input.char_indices() {
        match quote {
            Some(open) => {
                if ch == open {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(offset);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

struct Expander<'t> {
    file: &'t Path,
    env: Env,
    defs: Defs,
    out: Vec<String>,
}

impl Expander<'_> {
    fn nodes(&mut self, nodes: &[Node]) -> Result<(), Error> {
        for node in nodes {
            self.node(node)?;
        }
        Ok(())
    }

    fn node(&mut self, node: &Node) -> Result<(), Error> {
        match node {
            Node::Blank => self.out.push(String::new()),
            Node::Text(text) => {
                let rendered = self.render(text)?;
                self.out.push(rendered);
            }
            Node::Def { name, def } => {
                self.defs.insert(name.clone(), def.clone());
            }
            Node::Cond { arms } => {
                for arm in arms {
                    let taken = match &arm.cond {
                        Some(cond) => self.eval_bool(cond, arm.line)?,
                        None => true,
                    };
                    if taken {
                        return self.nodes(&arm.body);
                    }
                }
            }
            Node::Loop {
                var,
                iterable,
                line,
                body,
            } => {
                let items = match self.eval(iterable, *line)? {
                    Value::Tuple(items) => items,
                    other => {
                        return Err(self.evaluation(
                            *line,
                            EvalError::TypeMismatch {
                                expected: "tuple",
                                actual: other.kind(),
                            },
                        ))
                    }
                };

                // the loop variable shadows any parameter of the same name
                let saved = self.env.remove(var);
                for item in items {
                    self.env.insert(var.clone(), item);
                    self.nodes(body)?;
                }
                match saved {
                    Some(value) => self.env.insert(var.clone(), value),
                    None => self.env.remove(var),
                };
            }
        }
        Ok(())
    }

    fn render(&self, text: &TextLine) -> Result<String, Error> {
        let mut out = String::new();
        for segment in &text.segments {
            match segment {
                Segment::Text(literal) => out.push_str(literal),
                Segment::Expr(expr) => {
                    let value = self.eval(expr, text.line)?;
                    out.push_str(&value.to_string());
                }
            }
        }
        Ok(out)
    }

    fn eval(&self, expr: &Expr, line: usize) -> Result<Value, Error> {
        expr::eval(expr, &self.env, &self.defs).map_err(|source| self.evaluation(line, source))
    }

    fn eval_bool(&self, expr: &Expr, line: usize) -> Result<bool, Error> {
        match self.eval(expr, line)? {
            Value::Bool(flag) => Ok(flag),
            other => Err(self.evaluation(
                line,
                EvalError::TypeMismatch {
                    expected: "boolean",
                    actual: other.kind(),
                },
            )),
        }
    }

    fn evaluation(&self, line: usize, source: EvalError) -> Error {
        Error::Evaluation {
            file: self.file.to_owned(),
            line,
            source,
        }
    }
}
