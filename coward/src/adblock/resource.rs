//! Engine resource types and their filter-list labels.

use rustc_hash::FxHashMap;

/// Resource type reported by the browser engine for an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RawResourceType {
    MainFrame = 0,
    SubFrame = 1,
    Stylesheet = 2,
    Script = 3,
    Image = 4,
    FontResource = 5,
    SubResource = 6,
    Object = 7,
    Media = 8,
    Worker = 9,
    SharedWorker = 10,
    Prefetch = 11,
    Favicon = 12,
    Xhr = 13,
    Ping = 14,
    ServiceWorker = 15,
    CspReport = 16,
    PluginResource = 17,
    NavigationPreloadMainFrame = 19,
    NavigationPreloadSubFrame = 20,
    WebSocket = 254,
    Unknown = 255,
}

impl RawResourceType {
    pub const ALL: [Self; 22] = [
        Self::MainFrame,
        Self::SubFrame,
        Self::Stylesheet,
        Self::Script,
        Self::Image,
        Self::FontResource,
        Self::SubResource,
        Self::Object,
        Self::Media,
        Self::Worker,
        Self::SharedWorker,
        Self::Prefetch,
        Self::Favicon,
        Self::Xhr,
        Self::Ping,
        Self::ServiceWorker,
        Self::CspReport,
        Self::PluginResource,
        Self::NavigationPreloadMainFrame,
        Self::NavigationPreloadSubFrame,
        Self::WebSocket,
        Self::Unknown,
    ];

    /// Numeric code as sent by the engine; unrecognised codes are `Unknown`.
    pub fn from_code(code: u8) -> Self {
        Self::ALL
            .into_iter()
            .find(|kind| *kind as u8 == code)
            .unwrap_or(Self::Unknown)
    }
}

/// Resource kinds understood by filter rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Document,
    Subdocument,
    Stylesheet,
    Script,
    Image,
    Ping,
    Websocket,
    XmlHttpRequest,
}

impl ResourceKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Subdocument => "subdocument",
            Self::Stylesheet => "stylesheet",
            Self::Script => "script",
            Self::Image => "image",
            Self::Ping => "ping",
            Self::Websocket => "websocket",
            Self::XmlHttpRequest => "xmlhttprequest",
        }
    }

    fn for_raw(raw: RawResourceType) -> Option<Self> {
        match raw {
            RawResourceType::MainFrame => Some(Self::Document),
            RawResourceType::SubFrame => Some(Self::Subdocument),
            RawResourceType::Stylesheet => Some(Self::Stylesheet),
            RawResourceType::Script => Some(Self::Script),
            RawResourceType::Image => Some(Self::Image),
            RawResourceType::Ping => Some(Self::Ping),
            RawResourceType::WebSocket => Some(Self::Websocket),
            RawResourceType::Xhr => Some(Self::XmlHttpRequest),
            _ => None,
        }
    }
}

/// Raw type to label table, built once at startup.
#[derive(Debug, Clone)]
pub struct ResourceKindMap {
    labels: FxHashMap<RawResourceType, &'static str>,
}

impl Default for ResourceKindMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceKindMap {
    pub fn new() -> Self {
        let labels = RawResourceType::ALL
            .into_iter()
            .filter_map(|raw| ResourceKind::for_raw(raw).map(|kind| (raw, kind.label())))
            .collect();
        Self { labels }
    }

    /// Label for `raw`; the empty string when the kind has no filter-list name.
    pub fn label(&self, raw: RawResourceType) -> &'static str {
        self.labels.get(&raw).copied().unwrap_or("")
    }
}
