use std::{collections::BTreeMap, ops::Range};

/// Line-preserving view of a sectioned `key = value` file.
///
/// Only lines whose key is overwritten are re-rendered. Comments, blank
/// lines, ordering and untouched entries come back out byte-for-byte.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    preamble: Vec<String>,
    sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    name: String,
    header: String,
    lines: Vec<String>,
}

fn section_name(line: &str) -> Option<&str> {
    let t = line.trim();
    t.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .map(str::trim)
}

fn entry_key(line: &str) -> Option<&str> {
    let t = line.trim_start();
    if t.is_empty() || t.starts_with('#') || t.starts_with(';') {
        return None;
    }
    let (key, _) = t.split_once('=')?;
    Some(key.trim())
}

fn is_continuation(line: &str) -> bool {
    let t = line.trim_start();
    line.len() != t.len() && !t.is_empty() && !t.starts_with(['#', ';'])
}

fn entry_value(line: &str) -> Option<&str> {
    entry_key(line)?;
    line.split_once('=').map(|(_, v)| v.trim())
}

/// Line ranges of each entry, including indented continuation lines that
/// extend its value.
fn entry_spans(lines: &[String]) -> Vec<Range<usize>> {
    let mut spans: Vec<Range<usize>> = Vec::new();
    let mut open = false;
    for (i, line) in lines.iter().enumerate() {
        if open && is_continuation(line) {
            if let Some(last) = spans.last_mut() {
                last.end = i + 1;
            }
            continue;
        }
        open = entry_key(line).is_some();
        if open {
            spans.push(i..i + 1);
        }
    }
    spans
}

impl Section {
    fn entries(&self) -> impl Iterator<Item = (Range<usize>, &str)> {
        entry_spans(&self.lines)
            .into_iter()
            .filter_map(move |span| entry_key(&self.lines[span.start]).map(|k| (span, k)))
    }

    /// Replaces every entry for `key`, continuation lines included, with a
    /// single `key = value` line.
    fn set(&mut self, key: &str, value: &str) {
        let rendered = format!("{key} = {value}");
        let matches: Vec<Range<usize>> = self
            .entries()
            .filter(|(_, k)| *k == key)
            .map(|(span, _)| span)
            .collect();
        if matches.is_empty() {
            // Append after the last non-blank line so the blank separator
            // before the next section stays where it was.
            let at = self
                .lines
                .iter()
                .rposition(|l| !l.trim().is_empty())
                .map(|i| i + 1)
                .unwrap_or(0);
            self.lines.insert(at, rendered);
            return;
        }
        for span in matches.into_iter().rev() {
            self.lines.splice(span, [rendered.clone()]);
        }
    }
}

impl IniDocument {
    pub fn parse(text: &str) -> Self {
        let mut doc = IniDocument::default();
        for line in text.lines() {
            if let Some(name) = section_name(line) {
                doc.sections.push(Section {
                    name: name.to_string(),
                    header: line.to_string(),
                    lines: Vec::new(),
                });
                continue;
            }
            match doc.sections.last_mut() {
                Some(section) => section.lines.push(line.to_string()),
                None => doc.preamble.push(line.to_string()),
            }
        }
        doc
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.name.as_str())
    }

    /// Value of the last `key` entry in `section`. For a value continued on
    /// indented lines, only the part on the key's own line.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .filter(|s| s.name == section)
            .flat_map(|s| {
                s.entries()
                    .filter(move |(_, k)| *k == key)
                    .filter_map(move |(span, _)| entry_value(&s.lines[span.start]))
            })
            .last()
    }

    /// Replaces `key` in place, or appends it to the section. A missing
    /// section is created at the end of the document.
    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        if let Some(s) = self.sections.iter_mut().find(|s| s.name == section) {
            s.set(key, value);
            return;
        }
        if let Some(last) = self.sections.last_mut()
            && last.lines.last().is_some_and(|l| !l.trim().is_empty())
        {
            last.lines.push(String::new());
        }
        let mut s = Section {
            name: section.to_string(),
            header: format!("[{section}]"),
            lines: Vec::new(),
        };
        s.set(key, value);
        self.sections.push(s);
    }

    pub fn apply(&mut self, section: &str, values: &BTreeMap<String, String>) {
        for (k, v) in values {
            self.set(section, k, v);
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let lines = self.preamble.iter().chain(
            self.sections
                .iter()
                .flat_map(|s| std::iter::once(&s.header).chain(s.lines.iter())),
        );
        for line in lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# top comment
[server:main]
use = egg:Paste#http
port = 8080

[app:main]
# admin_users = None
paste.app_factory = galaxy.web.buildapp:app_factory
debug=False
";

    #[test]
    fn untouched_document_round_trips() {
        assert_eq!(IniDocument::parse(SAMPLE).render(), SAMPLE);
    }

    #[test]
    fn existing_key_is_replaced_in_place() {
        let mut doc = IniDocument::parse(SAMPLE);
        doc.set("server:main", "port", "9090");
        let out = doc.render();
        assert!(out.contains("use = egg:Paste#http\nport = 9090\n\n[app:main]"));
        assert_eq!(doc.get("server:main", "port"), Some("9090"));
    }

    #[test]
    fn missing_key_is_appended_to_its_section() {
        let mut doc = IniDocument::parse(SAMPLE);
        doc.set("server:main", "host", "0.0.0.0");
        doc.set("app:main", "admin_users", "a@x,b@x");
        let out = doc.render();
        assert!(out.contains("port = 8080\nhost = 0.0.0.0\n\n[app:main]"));
        assert!(out.ends_with("debug=False\nadmin_users = a@x,b@x\n"));
        assert!(out.contains("# admin_users = None\n"));
        assert_eq!(doc.get("app:main", "admin_users"), Some("a@x,b@x"));
        assert_eq!(doc.get("server:main", "admin_users"), None);
    }

    #[test]
    fn missing_section_is_created() {
        let mut doc = IniDocument::parse(SAMPLE);
        doc.set("filter:gzip", "use", "egg:Paste#gzip");
        let out = doc.render();
        assert!(out.ends_with("debug=False\n\n[filter:gzip]\nuse = egg:Paste#gzip\n"));
        assert_eq!(
            doc.section_names().collect::<Vec<_>>(),
            ["server:main", "app:main", "filter:gzip"]
        );
    }

    #[test]
    fn replacing_multiline_value_drops_its_continuation_lines() {
        let text = "\
[app:main]
tool_config_file = config/tool_conf.xml,
    config/shed_tool_conf.xml
  # indented comment
debug = False
";
        let mut doc = IniDocument::parse(text);
        assert_eq!(doc.render(), text);
        assert_eq!(doc.get("app:main", "tool_config_file"), Some("config/tool_conf.xml,"));
        assert_eq!(doc.get("app:main", "config/shed_tool_conf.xml"), None);

        doc.set("app:main", "tool_config_file", "a.xml");
        assert_eq!(
            doc.render(),
            "[app:main]\ntool_config_file = a.xml\n  # indented comment\ndebug = False\n"
        );
    }

    #[test]
    fn indented_line_without_preceding_entry_is_a_key() {
        let mut doc = IniDocument::parse("[app:main]\n  port = 1\n\n    host = h\n");
        assert_eq!(doc.get("app:main", "port"), Some("1"));
        assert_eq!(doc.get("app:main", "host"), Some("h"));
        doc.set("app:main", "port", "2");
        assert_eq!(doc.render(), "[app:main]\nport = 2\n\n    host = h\n");
    }

    #[test]
    fn comments_are_not_keys() {
        let doc = IniDocument::parse(SAMPLE);
        assert_eq!(doc.get("app:main", "admin_users"), None);
        assert_eq!(doc.get("app:main", "debug"), Some("False"));
    }
}
