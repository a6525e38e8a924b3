use crate::error::{KilroyError, Result};
use crate::xml::{self, Element};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Container tags accepted for the protocol list. The first one is written.
pub const PROTOCOLS_CONTAINERS: &[&str] = &["kilroy_protocols", "protocols"];
pub const PROTOCOL_TAG: &str = "protocol";

// ---------------------------------------------------------------------------
// DeviceType
// ---------------------------------------------------------------------------

/// Hardware addressed by a command. Unrecognized tags are kept verbatim so
/// documents written for newer hardware survive a load/save cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Pump,
    Valve,
    Unknown(String),
}

impl DeviceType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "pump" => DeviceType::Pump,
            "valve" => DeviceType::Valve,
            other => DeviceType::Unknown(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            DeviceType::Pump => "pump",
            DeviceType::Valve => "valve",
            DeviceType::Unknown(tag) => tag,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

// ---------------------------------------------------------------------------
// Command / Protocol
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub device: DeviceType,
    pub action: String,
    pub duration_secs: u64,
}

impl Command {
    pub fn new(device: DeviceType, action: impl Into<String>, duration_secs: u64) -> Self {
        Self {
            device,
            action: action.into(),
            duration_secs,
        }
    }

    pub fn pump(action: impl Into<String>, duration_secs: u64) -> Self {
        Self::new(DeviceType::Pump, action, duration_secs)
    }

    pub fn valve(action: impl Into<String>, duration_secs: u64) -> Self {
        Self::new(DeviceType::Valve, action, duration_secs)
    }

    pub(crate) fn to_element(&self) -> Element {
        Element::new(self.device.tag())
            .with_attribute("duration", self.duration_secs.to_string())
            .with_text(self.action.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    pub name: String,
    pub commands: Vec<Command>,
}

impl Protocol {
    pub fn new(name: impl Into<String>, commands: Vec<Command>) -> Self {
        Self {
            name: name.into(),
            commands,
        }
    }

    /// Sum of the raw command durations, without estimator overheads.
    pub fn nominal_duration(&self) -> u64 {
        self.commands
            .iter()
            .map(|c| c.duration_secs)
            .fold(0, u64::saturating_add)
    }

    pub(crate) fn to_element(&self) -> Element {
        self.commands.iter().fold(
            Element::new(PROTOCOL_TAG).with_attribute("name", self.name.clone()),
            |el, cmd| el.with_child(cmd.to_element()),
        )
    }

    fn from_element(element: &Element, origin: &str) -> Result<Self> {
        let name = element
            .attribute("name")
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| KilroyError::config(origin, "protocol element without a name"))?
            .to_string();

        let mut commands = Vec::with_capacity(element.children.len());
        for (index, child) in element.children.iter().enumerate() {
            let raw = child.attribute("duration").ok_or_else(|| {
                KilroyError::config(
                    origin,
                    format!("command {index} of protocol '{name}' has no duration"),
                )
            })?;
            let duration_secs = raw.trim().parse::<u64>().map_err(|_| {
                KilroyError::config(
                    origin,
                    format!(
                        "command {index} of protocol '{name}' has invalid duration '{raw}': expected a non-negative integer"
                    ),
                )
            })?;
            let device = DeviceType::from_tag(&child.name);
            if let DeviceType::Unknown(tag) = &device {
                tracing::warn!(protocol = %name, tag = %tag, "unknown command tag");
            }
            commands.push(Command::new(device, child.text.trim(), duration_secs));
        }

        Ok(Self { name, commands })
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Parsed protocol document: protocols by name in document order, plus the
/// source tree so generated documents can carry the full configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    protocols: IndexMap<String, Protocol>,
    document: Element,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self> {
        let origin = path.display().to_string();
        let data = std::fs::read_to_string(path)
            .map_err(|e| KilroyError::config(origin.as_str(), e.to_string()))?;
        Self::parse(&data, &origin)
    }

    pub fn parse(input: &str, origin: &str) -> Result<Self> {
        let document = xml::parse(input, origin)?;
        Self::from_document(document, origin)
    }

    pub fn from_document(document: Element, origin: &str) -> Result<Self> {
        let containers: Vec<&Element> = document.children_named(PROTOCOLS_CONTAINERS).collect();
        if containers.is_empty() {
            return Err(KilroyError::config(
                origin,
                format!("missing <{}> container", PROTOCOLS_CONTAINERS[0]),
            ));
        }

        let mut protocols = IndexMap::new();
        for container in containers {
            for element in container.children_named(&[PROTOCOL_TAG]) {
                let protocol = Protocol::from_element(element, origin)?;
                if protocols.contains_key(&protocol.name) {
                    return Err(KilroyError::config(
                        origin,
                        format!("duplicate protocol name '{}'", protocol.name),
                    ));
                }
                protocols.insert(protocol.name.clone(), protocol);
            }
        }
        tracing::debug!(origin, count = protocols.len(), "loaded protocol catalog");

        Ok(Self {
            protocols,
            document,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Protocol> {
        self.protocols.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&Protocol> {
        self.get(name)
            .ok_or_else(|| KilroyError::UnknownProtocol(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.protocols.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.protocols.keys().map(String::as_str)
    }

    pub fn protocols(&self) -> impl Iterator<Item = &Protocol> {
        self.protocols.values()
    }

    pub fn len(&self) -> usize {
        self.protocols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }

    /// A new catalog with `protocol` appended in its own container.
    /// Existing names are never replaced.
    pub fn with_protocol(&self, protocol: Protocol) -> Result<Self> {
        if self.contains(&protocol.name) {
            return Err(KilroyError::ProtocolExists(protocol.name));
        }
        let mut document = self.document.clone();
        document.children.push(
            Element::new(PROTOCOLS_CONTAINERS[0]).with_child(protocol.to_element()),
        );
        let mut protocols = self.protocols.clone();
        protocols.insert(protocol.name.clone(), protocol);
        Ok(Self {
            protocols,
            document,
        })
    }

    pub fn render(&self) -> Result<String> {
        xml::render(&self.document)
    }
}

/// Name of the base protocol for one hybridization cycle.
pub fn hybridize_name(hybe: u32) -> String {
    format!("Hybridize {hybe}")
}


#[cfg(test)]
mod tests {
    use super::fixtures::{catalog, CATALOG_XML};
    use super::*;

    #[test]
    fn loads_protocols_in_document_order() {
        let cat = catalog();
        let names: Vec<&str> = cat.names().collect();
        assert_eq!(
            names,
            vec![
                "Hybridize 1",
                "Hybridize 2",
                "Hybridize 3",
                "Wait Microscopy 1",
                "Pumps Only"
            ]
        );
        let h1 = cat.get("Hybridize 1").unwrap();
        assert_eq!(h1.commands.len(), 4);
        assert_eq!(h1.commands[0], Command::valve("Hybridization Buffer 1", 0));
        assert_eq!(h1.commands[1], Command::pump("Flow", 120));
    }

    #[test]
    fn missing_container_is_config_error() {
        let err = Catalog::parse("<kilroy_configuration/>", "bare.xml").unwrap_err();
        assert!(matches!(err, KilroyError::Config { .. }));
        assert!(err.to_string().contains("kilroy_protocols"));
    }

    #[test]
    fn bare_protocols_container_is_accepted() {
        let doc = r#"<config><protocols><protocol name="A"><pump duration="3">Flow</pump></protocol></protocols></config>"#;
        let cat = Catalog::parse(doc, "alt").unwrap();
        assert_eq!(cat.require("A").unwrap().nominal_duration(), 3);
    }

    #[test]
    fn negative_duration_is_rejected_with_protocol_name() {
        let doc = r#"<c><kilroy_protocols><protocol name="Bad"><pump duration="-5">Flow</pump></protocol></kilroy_protocols></c>"#;
        let err = Catalog::parse(doc, "neg").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Bad"));
        assert!(msg.contains("-5"));
    }

    #[test]
    fn missing_duration_is_rejected() {
        let doc = r#"<c><kilroy_protocols><protocol name="Bad"><pump>Flow</pump></protocol></kilroy_protocols></c>"#;
        assert!(matches!(
            Catalog::parse(doc, "nodur"),
            Err(KilroyError::Config { .. })
        ));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let doc = r#"<c><kilroy_protocols><protocol name="A"/><protocol name="A"/></kilroy_protocols></c>"#;
        let err = Catalog::parse(doc, "dup").unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn unknown_tag_is_kept() {
        let doc = r#"<c><kilroy_protocols><protocol name="A"><shutter duration="2">Open</shutter></protocol></kilroy_protocols></c>"#;
        let cat = Catalog::parse(doc, "ext").unwrap();
        let cmd = &cat.require("A").unwrap().commands[0];
        assert_eq!(cmd.device, DeviceType::Unknown("shutter".to_string()));

        let again = Catalog::parse(&cat.render().unwrap(), "rendered").unwrap();
        assert_eq!(again.require("A").unwrap().commands[0].device.tag(), "shutter");
    }

    #[test]
    fn empty_protocol_is_legal() {
        let doc = r#"<c><kilroy_protocols><protocol name="Nothing"></protocol></kilroy_protocols></c>"#;
        let cat = Catalog::parse(doc, "empty").unwrap();
        assert!(cat.require("Nothing").unwrap().commands.is_empty());
    }

    #[test]
    fn require_unknown_names_the_protocol() {
        let err = catalog().require("Hybridize 9").unwrap_err();
        assert!(matches!(err, KilroyError::UnknownProtocol(ref n) if n == "Hybridize 9"));
    }

    #[test]
    fn with_protocol_appends_and_refuses_duplicates() {
        let cat = catalog();
        let extended = cat
            .with_protocol(Protocol::new("New", vec![Command::pump("Stop Flow", 5)]))
            .unwrap();
        assert_eq!(extended.len(), cat.len() + 1);
        assert_eq!(cat.len(), 5);
        assert!(matches!(
            extended.with_protocol(Protocol::new("New", vec![])),
            Err(KilroyError::ProtocolExists(_))
        ));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("default_config.xml");
        std::fs::write(&path, CATALOG_XML).unwrap();
        assert_eq!(Catalog::load(&path).unwrap().len(), 5);
        assert!(matches!(
            Catalog::load(&dir.path().join("missing.xml")),
            Err(KilroyError::Config { .. })
        ));
    }
}
