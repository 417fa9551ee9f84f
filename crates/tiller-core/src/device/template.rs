// Tiller Device Templates
// Declarative blueprints resolved into concrete device instances

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::fourcc::FourCC;

/// Result type for template operations
pub type TemplateResult<T> = Result<T, TemplateError>;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template name is empty")]
    EmptyName,

    #[error("template `{0}` declares a zero-byte state block")]
    ZeroStateSize(String),

    #[error("control `{control}` in template `{template}` has an empty name")]
    EmptyControlName { template: String, control: usize },

    #[error("control `{control}` in template `{template}` lies outside its {size}-byte state block")]
    ControlOutOfRange {
        template: String,
        control: String,
        size: u32,
    },

    #[error("button `{control}` in template `{template}` addresses bit {bit} of a byte")]
    BitOutOfRange {
        template: String,
        control: String,
        bit: u8,
    },

    #[error("template definition failed to parse: {0}")]
    Parse(String),
}

/// Category of a control within a device's state block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    /// One bit of a byte; pressed when set.
    Button,
    /// A little-endian `f32` value.
    Axis,
    /// Two consecutive axes (`x` at `offset`, `y` at `offset + 4`);
    /// instantiation expands child axis controls under `<name>/x` and
    /// `<name>/y`.
    Stick,
}

/// One control as declared by a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSpec {
    pub name: String,
    pub kind: ControlKind,
    /// Byte offset into the device's state block.
    pub offset: u32,
    /// Bit index within the byte at `offset`; buttons only.
    #[serde(default)]
    pub bit: u8,
}

impl ControlSpec {
    /// Bytes of state this control occupies starting at `offset`.
    pub fn footprint(&self) -> u32 {
        match self.kind {
            ControlKind::Button => 1,
            ControlKind::Axis => 4,
            ControlKind::Stick => 8,
        }
    }
}

/// Declarative description of one device type.
///
/// Templates are plain data; they can be built in code or deserialized from
/// TOML. Resolving a template produces a device wired to a state block of
/// `state_size_in_bytes` bytes tagged with `format`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTemplate {
    pub name: String,
    pub format: FourCC,
    pub state_size_in_bytes: u32,
    #[serde(default)]
    pub controls: Vec<ControlSpec>,
}

impl DeviceTemplate {
    pub fn new(name: impl Into<String>, format: FourCC, state_size_in_bytes: u32) -> Self {
        Self {
            name: name.into(),
            format,
            state_size_in_bytes,
            controls: Vec::new(),
        }
    }

    pub fn with_button(mut self, name: impl Into<String>, offset: u32, bit: u8) -> Self {
        self.controls.push(ControlSpec {
            name: name.into(),
            kind: ControlKind::Button,
            offset,
            bit,
        });
        self
    }

    pub fn with_axis(mut self, name: impl Into<String>, offset: u32) -> Self {
        self.controls.push(ControlSpec {
            name: name.into(),
            kind: ControlKind::Axis,
            offset,
            bit: 0,
        });
        self
    }

    pub fn with_stick(mut self, name: impl Into<String>, offset: u32) -> Self {
        self.controls.push(ControlSpec {
            name: name.into(),
            kind: ControlKind::Stick,
            offset,
            bit: 0,
        });
        self
    }

    /// Parse a template from its TOML form.
    ///
    /// ```toml
    /// name = "Gamepad"
    /// format = "GPAD"
    /// state_size_in_bytes = 12
    ///
    /// [[controls]]
    /// name = "buttonSouth"
    /// kind = "button"
    /// offset = 0
    /// bit = 0
    ///
    /// [[controls]]
    /// name = "leftStick"
    /// kind = "stick"
    /// offset = 4
    /// ```
    pub fn from_toml(text: &str) -> TemplateResult<Self> {
        let template: DeviceTemplate =
            toml::from_str(text).map_err(|err| TemplateError::Parse(err.to_string()))?;
        template.validate()?;
        Ok(template)
    }

    /// Check the template for internal consistency.
    pub fn validate(&self) -> TemplateResult<()> {
        if self.name.is_empty() {
            return Err(TemplateError::EmptyName);
        }
        if self.state_size_in_bytes == 0 {
            return Err(TemplateError::ZeroStateSize(self.name.clone()));
        }
        for (index, control) in self.controls.iter().enumerate() {
            if control.name.is_empty() {
                return Err(TemplateError::EmptyControlName {
                    template: self.name.clone(),
                    control: index,
                });
            }
            let end = control.offset.checked_add(control.footprint());
            if end.map_or(true, |end| end > self.state_size_in_bytes) {
                return Err(TemplateError::ControlOutOfRange {
                    template: self.name.clone(),
                    control: control.name.clone(),
                    size: self.state_size_in_bytes,
                });
            }
            if control.kind == ControlKind::Button && control.bit > 7 {
                return Err(TemplateError::BitOutOfRange {
                    template: self.name.clone(),
                    control: control.name.clone(),
                    bit: control.bit,
                });
            }
        }
        Ok(())
    }
}

/// Name-keyed registry of device templates.
///
/// Lookup is case-insensitive. Registering a name twice silently replaces
/// the earlier template (last wins); insertion order is preserved for
/// enumeration.
#[derive(Default)]
pub struct TemplateRegistry {
    templates: IndexMap<String, DeviceTemplate>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `template`, validating it first.
    pub fn register(&mut self, template: DeviceTemplate) -> TemplateResult<()> {
        template.validate()?;
        let key = template.name.to_ascii_lowercase();
        if self.templates.insert(key, template).is_some() {
            log::debug!("template registration replaced an earlier entry");
        }
        Ok(())
    }

    /// Resolve `name` to its template, case-insensitively.
    pub fn find(&self, name: &str) -> Option<&DeviceTemplate> {
        self.templates.get(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Iterate templates in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceTemplate> {
        self.templates.values()
    }
}
