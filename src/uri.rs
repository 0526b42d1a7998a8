//! Classification of Spotify URIs and web links
//!
//! Two input forms are recognized:
//!
//! - `spotify:track:<id>` / `spotify:album:<id>`
//! - `open.spotify.com/track/<id>` / `open.spotify.com/album/<id>`
//!
//! where `<id>` is exactly 22 characters. Both forms classify to the same
//! kind and produce the canonical `spotify:<type>:<id>` string.

const SCHEME: &str = "spotify:";
const WEB_HOST: &str = "open.spotify.com/";
const ID_LEN: usize = 22;

/// Shortest input that can possibly be valid (`spotify:track:` + id)
const MIN_URI_LEN: usize = SCHEME.len() + "track:".len() + ID_LEN;

/// What a URI points at
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemKind {
    Track,
    Album,
    Unknown,
}

impl ItemKind {
    fn keyword(self) -> Option<&'static str> {
        match self {
            ItemKind::Track => Some("track"),
            ItemKind::Album => Some("album"),
            ItemKind::Unknown => None,
        }
    }

    fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "track" => ItemKind::Track,
            "album" => ItemKind::Album,
            _ => ItemKind::Unknown,
        }
    }
}

/// Classify `uri` and return its canonical form.
///
/// Anything that is not one of the recognized forms yields
/// `(ItemKind::Unknown, String::new())`.
pub fn classify(uri: &str) -> (ItemKind, String) {
    let unknown = (ItemKind::Unknown, String::new());

    if uri.len() < MIN_URI_LEN {
        return unknown;
    }

    let (keyword, id) = if let Some(rest) = uri.strip_prefix(SCHEME) {
        match rest.split_once(':') {
            Some(parts) => parts,
            None => return unknown,
        }
    } else if let Some(rest) = uri.strip_prefix(WEB_HOST) {
        match rest.split_once('/') {
            Some(parts) => parts,
            None => return unknown,
        }
    } else {
        return unknown;
    };

    let kind = ItemKind::from_keyword(keyword);
    if kind == ItemKind::Unknown || id.chars().count() != ID_LEN {
        return unknown;
    }

    match canonical_uri(kind, id) {
        Some(canonical) => (kind, canonical),
        None => unknown,
    }
}

/// Build `spotify:<type>:<id>` for a known kind.
pub fn canonical_uri(kind: ItemKind, id: &str) -> Option<String> {
    kind.keyword().map(|keyword| format!("{SCHEME}{keyword}:{id}"))
}

/// The 22 character id of an already canonical URI.
pub fn id_of(canonical: &str) -> &str {
    canonical.rsplit(':').next().unwrap_or(canonical)
}
