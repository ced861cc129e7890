//! Terminal diagnostics for generation failures.

use std::ops::Range;

use crate::error::Error;
use crate::generator::Failure;

/// Prints one failure to stderr, pointing into the offending template
/// line when the error carries a position.
pub fn emit(failure: &Failure) {
    use codespan_reporting::{
        diagnostic::{Diagnostic, Label},
        files::SimpleFile,
        term,
    };

    let mut notes = Vec::new();
    if let Some(variant) = &failure.variant {
        notes.push(format!("while generating '{variant}'"));
    }

    let config = term::Config::default();
    let mut writer = term::termcolor::Ansi::new(std::io::stderr());

    match located_source(&failure.error) {
        Some((path, text, range)) => {
            // the label already names the file and line
            let (message, root): (String, &(dyn std::error::Error + 'static)) =
                match &failure.error {
                    Error::Syntax { message, .. } => (message.clone(), &failure.error),
                    Error::Evaluation { source, .. } => (source.to_string(), source),
                    other => (other.to_string(), other),
                };
            chain_notes(root, &mut notes);
            let files = SimpleFile::new(path, text);
            let diagnostic = Diagnostic::error()
                .with_message(message)
                .with_labels(vec![Label::primary((), range)])
                .with_notes(notes);
            term::emit(&mut writer, &config, &files, &diagnostic).expect("cannot write error");
        }
        None => {
            chain_notes(&failure.error, &mut notes);
            let files = SimpleFile::new(String::new(), String::new());
            let diagnostic = Diagnostic::<()>::error()
                .with_message(failure.error.to_string())
                .with_notes(notes);
            term::emit(&mut writer, &config, &files, &diagnostic).expect("cannot write error");
        }
    }
}

// notes continue below whatever the headline already shows
fn chain_notes(root: &(dyn std::error::Error + 'static), notes: &mut Vec<String>) {
    let mut source = root;
    while let Some(next) = source.source() {
        notes.push(next.to_string());
        source = next;
    }
}

fn located_source(error: &Error) -> Option<(String, String, Range<usize>)> {
    let (path, line) = error.position()?;
    let text = std::fs::read_to_string(path).ok()?;
    let range = line_range(&text, line)?;
    Some((path.display().to_string(), text, range))
}

fn line_range(text: &str, line: usize) -> Option<Range<usize>> {
    let mut offset = 0usize;
    for (index, raw) in text.split_inclusive('\n').enumerate() {
        if index + 1 == line {
            let content = raw.trim_end_matches(|c| c == '\n' || c == '\r');
            return Some(offset..offset + content.len());
        }
        offset += raw.len();
    }
    None
}
