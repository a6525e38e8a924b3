//! Minimal element tree over `quick-xml`.
//!
//! Kilroy documents are small, shallow and order-sensitive, so they are read
//! into a plain owned tree and written back with the blank-line separated
//! indentation the fluidics tooling has always produced.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{KilroyError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Direct children whose tag is any of `names`, in document order.
    pub fn children_named<'a>(
        &'a self,
        names: &'a [&'a str],
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.children
            .iter()
            .filter(move |c| names.contains(&c.name.as_str()))
    }

    fn from_start(start: &BytesStart<'_>) -> std::result::Result<Self, String> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| e.to_string())?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value().map_err(|e| e.to_string())?;
            attributes.push((key, value.into_owned()));
        }
        Ok(Self {
            name,
            attributes,
            text: String::new(),
            children: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Parse `input` into its root element. `origin` names the source in errors.
pub fn parse(input: &str, origin: &str) -> Result<Element> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            KilroyError::config(
                origin,
                format!("at byte {}: {e}", reader.error_position()),
            )
        })?;
        match event {
            Event::Start(start) => {
                stack.push(Element::from_start(&start).map_err(|e| KilroyError::config(origin, e))?);
            }
            Event::Empty(start) => {
                let element =
                    Element::from_start(&start).map_err(|e| KilroyError::config(origin, e))?;
                attach(&mut stack, &mut root, element, origin)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| KilroyError::config(origin, "unbalanced closing tag"))?;
                attach(&mut stack, &mut root, element, origin)?;
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| KilroyError::config(origin, e.to_string()))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(KilroyError::config(origin, "document ended inside an element"));
    }
    root.ok_or_else(|| KilroyError::config(origin, "document has no root element"))
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
    origin: &str,
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(KilroyError::config(origin, "multiple root elements")),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Render `root` as a complete document.
pub fn render(root: &Element) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    emit(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;
    emit(&mut writer, Event::Text(BytesText::from_escaped("\n")))?;
    write_element(&mut writer, root, 0)?;
    emit(&mut writer, Event::Text(BytesText::from_escaped("\n")))?;
    String::from_utf8(writer.into_inner()).map_err(|e| KilroyError::Render(e.to_string()))
}

fn indent(level: usize) -> String {
    format!("\n\n{}", "  ".repeat(level))
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element, level: usize) -> Result<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        if element.text.is_empty() {
            return emit(writer, Event::Empty(start));
        }
        emit(writer, Event::Start(start))?;
        emit(writer, Event::Text(BytesText::new(element.text.as_str())))?;
        return emit(writer, Event::End(BytesEnd::new(element.name.as_str())));
    }

    emit(writer, Event::Start(start))?;
    let inner = indent(level + 1);
    for child in &element.children {
        emit(writer, Event::Text(BytesText::from_escaped(inner.as_str())))?;
        write_element(writer, child, level + 1)?;
    }
    let outer = indent(level);
    emit(writer, Event::Text(BytesText::from_escaped(outer.as_str())))?;
    emit(writer, Event::End(BytesEnd::new(element.name.as_str())))
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| KilroyError::Render(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<?xml version="1.0" encoding="ISO-8859-1"?>
<kilroy_configuration num_valves="1">
  <kilroy_protocols>
    <protocol name="Hybridize 1">
      <valve duration="0">Wash Buffer</valve>
      <pump duration="60">Flow &amp; Hold</pump>
    </protocol>
    <protocol name="Empty"/>
  </kilroy_protocols>
</kilroy_configuration>
"#;

    #[test]
    fn parses_nested_elements_in_order() {
        let root = parse(DOC, "test").unwrap();
        assert_eq!(root.name, "kilroy_configuration");
        assert_eq!(root.attribute("num_valves"), Some("1"));
        let protocols = &root.children[0];
        assert_eq!(protocols.children.len(), 2);
        let hybe = &protocols.children[0];
        assert_eq!(hybe.attribute("name"), Some("Hybridize 1"));
        assert_eq!(hybe.children[0].name, "valve");
        assert_eq!(hybe.children[1].text, "Flow & Hold");
        assert!(protocols.children[1].children.is_empty());
    }

    #[test]
    fn rejects_mismatched_tags() {
        let err = parse("<a><b></a>", "broken.xml").unwrap_err();
        assert!(matches!(err, KilroyError::Config { ref origin, .. } if origin == "broken.xml"));
    }

    #[test]
    fn rejects_empty_input() {
        assert!(parse("", "empty").is_err());
    }

    #[test]
    fn render_uses_blank_line_indentation() {
        let root = Element::new("root").with_child(
            Element::new("protocol")
                .with_attribute("name", "p")
                .with_child(Element::new("pump").with_attribute("duration", "5").with_text("Stop Flow")),
        );
        let out = render(&root).unwrap();
        assert!(out.contains("<root>\n\n  <protocol name=\"p\">\n\n    <pump duration=\"5\">Stop Flow</pump>\n\n  </protocol>\n\n</root>"));
    }

    #[test]
    fn render_then_parse_preserves_tree() {
        let root = parse(DOC, "test").unwrap();
        let again = parse(&render(&root).unwrap(), "rendered").unwrap();
        assert_eq!(root, again);
    }
}
