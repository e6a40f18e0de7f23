use serde::{Deserialize, Deserializer, Serialize};

pub type LayerId = i64;
pub type ClipId = i64;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Param<T> {
    pub value: T,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RangeParam {
    pub value: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ParamUpdate {
    pub value: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(from = "RawComposition", into = "RawComposition")]
pub struct Composition {
    pub name: String,
    pub layers: Vec<Layer>,
}

impl Composition {
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            "Untitled"
        } else {
            &self.name
        }
    }

    // Columns address the same clip slot across layers, so the widest layer decides.
    pub fn column_count(&self) -> usize {
        self.layers.iter().map(|l| l.clips.len()).max().unwrap_or(0)
    }

    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn layer_by_id_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    pub fn clip_count(&self) -> usize {
        self.layers.iter().map(|l| l.clips.len()).sum()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(from = "RawLayer", into = "RawLayer")]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub opacity: f32,
    pub connected: Option<bool>,
    pub clips: Vec<Clip>,
}

impl Layer {
    pub fn display_name(&self, index: usize) -> String {
        if self.name.trim().is_empty() {
            format!("Layer {}", index + 1)
        } else {
            self.name.clone()
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(from = "RawClip", into = "RawClip")]
pub struct Clip {
    pub id: ClipId,
    pub name: String,
    pub connected: bool,
    // Informational only; playback position is never authoritative.
    pub position: Option<ClipPosition>,
}

impl Clip {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "Clip"
        } else {
            &self.name
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ClipPosition {
    pub value: f64,
    #[serde(default)]
    pub max: f64,
}

#[derive(Serialize, Deserialize)]
struct RawComposition {
    #[serde(default)]
    name: Option<Param<String>>,
    #[serde(default)]
    layers: Vec<Layer>,
}

impl From<RawComposition> for Composition {
    fn from(raw: RawComposition) -> Self {
        Self {
            name: raw.name.map(|p| p.value).unwrap_or_default(),
            layers: raw.layers,
        }
    }
}

impl From<Composition> for RawComposition {
    fn from(c: Composition) -> Self {
        Self {
            name: Some(Param { value: c.name }),
            layers: c.layers,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawLayer {
    id: LayerId,
    #[serde(default)]
    name: Option<Param<String>>,
    #[serde(default)]
    clips: Vec<Clip>,
    #[serde(default)]
    video: Option<RawVideo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    connected: Option<Param<ConnectedState>>,
}

#[derive(Serialize, Deserialize)]
struct RawVideo {
    #[serde(default)]
    opacity: Option<RangeParam>,
}

impl From<RawLayer> for Layer {
    fn from(raw: RawLayer) -> Self {
        let opacity = raw
            .video
            .and_then(|v| v.opacity)
            .map(|p| p.value)
            .unwrap_or(1.0);
        Self {
            id: raw.id,
            name: raw.name.map(|p| p.value).unwrap_or_default(),
            opacity,
            connected: raw.connected.map(|p| p.value.0),
            clips: raw.clips,
        }
    }
}

impl From<Layer> for RawLayer {
    fn from(l: Layer) -> Self {
        Self {
            id: l.id,
            name: Some(Param { value: l.name }),
            clips: l.clips,
            video: Some(RawVideo {
                opacity: Some(RangeParam {
                    value: l.opacity,
                    min: Some(0.0),
                    max: Some(1.0),
                }),
            }),
            connected: l.connected.map(|c| Param {
                value: ConnectedState(c),
            }),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawClip {
    id: ClipId,
    #[serde(default)]
    name: Option<Param<String>>,
    #[serde(default)]
    connected: Option<Param<ConnectedState>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transport: Option<RawTransport>,
}

#[derive(Serialize, Deserialize)]
struct RawTransport {
    #[serde(default)]
    position: Option<ClipPosition>,
}

impl From<RawClip> for Clip {
    fn from(raw: RawClip) -> Self {
        Self {
            id: raw.id,
            name: raw.name.map(|p| p.value).unwrap_or_default(),
            connected: raw.connected.map(|p| p.value.0).unwrap_or(false),
            position: raw.transport.and_then(|t| t.position),
        }
    }
}

impl From<Clip> for RawClip {
    fn from(c: Clip) -> Self {
        Self {
            id: c.id,
            name: Some(Param { value: c.name }),
            connected: Some(Param {
                value: ConnectedState(c.connected),
            }),
            transport: c.position.map(|p| RawTransport { position: Some(p) }),
        }
    }
}

// Older mixer builds report `connected` as a bool, newer ones as a choice
// string ("Connected", "Disconnected", "Empty", "Connected & previewing").
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(transparent)]
struct ConnectedState(bool);

impl<'de> Deserialize<'de> for ConnectedState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Flag(bool),
            Choice(String),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Flag(b) => ConnectedState(b),
            Repr::Choice(s) => ConnectedState(s.trim().starts_with("Connected")),
        })
    }
}
