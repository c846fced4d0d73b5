//! Minimal XML tokenizer for Office Open XML parts
//!
//! Only what the extractors need: element starts/ends, text runs and entity
//! decoding. Namespaces are left as written (`w:t`, `c`, ...).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum XmlEvent<'a> {
    Start {
        name: &'a str,
        attrs: &'a str,
        self_closing: bool,
    },
    End(&'a str),
    Text(&'a str),
}

pub(crate) struct XmlEvents<'a> {
    rest: &'a str,
}

impl<'a> XmlEvents<'a> {
    pub(crate) fn new(xml: &'a str) -> Self {
        Self { rest: xml }
    }
}

impl<'a> Iterator for XmlEvents<'a> {
    type Item = XmlEvent<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.rest.is_empty() {
                return None;
            }

            if !self.rest.starts_with('<') {
                let end = self.rest.find('<').unwrap_or(self.rest.len());
                let (text, rest) = self.rest.split_at(end);
                self.rest = rest;
                return Some(XmlEvent::Text(text));
            }

            if let Some(body) = self.rest.strip_prefix("<![CDATA[") {
                let end = body.find("]]>")?;
                self.rest = &body[end + 3..];
                return Some(XmlEvent::Text(&body[..end]));
            }

            if let Some(body) = self.rest.strip_prefix("<!--") {
                let end = body.find("-->")?;
                self.rest = &body[end + 3..];
                continue;
            }

            let end = tag_end(self.rest)?;
            let tag = &self.rest[1..end];
            self.rest = &self.rest[end + 1..];

            if tag.starts_with('?') || tag.starts_with('!') {
                continue;
            }

            if let Some(name) = tag.strip_prefix('/') {
                return Some(XmlEvent::End(name.trim()));
            }

            let (tag, self_closing) = match tag.strip_suffix('/') {
                Some(inner) => (inner, true),
                None => (tag, false),
            };
            let tag = tag.trim();
            let (name, attrs) = tag.split_once(char::is_whitespace).unwrap_or((tag, ""));
            return Some(XmlEvent::Start {
                name,
                attrs,
                self_closing,
            });
        }
    }
}

/// Byte offset of the `>` closing the tag at the start of `s`, skipping any
/// `>` inside quoted attribute values
fn tag_end(s: &str) -> Option<usize> {
    let mut quote = None;
    for (i, b) in s.bytes().enumerate() {
        match (quote, b) {
            (Some(q), _) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(b),
            (None, b'>') => return Some(i),
            _ => {}
        }
    }
    None
}

/// Look up an attribute value (still entity-encoded) in a start tag
pub(crate) fn attribute<'a>(attrs: &'a str, key: &str) -> Option<&'a str> {
    let mut rest = attrs;
    loop {
        let eq = rest.find('=')?;
        let name = rest[..eq].trim();
        let after = rest[eq + 1..].trim_start();
        let quote = after.chars().next().filter(|c| *c == '"' || *c == '\'')?;
        let close = after[1..].find(quote)?;
        if name == key {
            return Some(&after[1..1 + close]);
        }
        rest = &after[close + 2..];
    }
}

/// Decode the predefined and numeric character entities
pub(crate) fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').and_then(|semi| {
            let entity = &tail[1..semi];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|ch| (ch, semi))
        });

        match decoded {
            Some((ch, semi)) => {
                out.push(ch);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
