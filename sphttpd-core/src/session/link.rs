//! Catalog links: `spotify:` URIs and their `open.spotify.com` URL forms.

use std::fmt;

use thiserror::Error;

const ID_LEN: usize = 22;
const WEB_PREFIXES: [&str; 2] = ["https://open.spotify.com/", "http://open.spotify.com/"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Link {
    Track(String),
    Album(String),
    Artist(String),
    Playlist { user: Option<String>, id: String },
    User(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("unrecognised link: {0}")]
    Unrecognised(String),
    #[error("invalid id in link: {0}")]
    InvalidId(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkKind {
    Track,
    Album,
    Artist,
    Playlist,
    User,
}

impl Link {
    pub fn parse(input: &str) -> Result<Self, LinkError> {
        let input = input.trim();
        if let Some(path) = WEB_PREFIXES.iter().find_map(|p| input.strip_prefix(p)) {
            let path = path.split(['?', '#']).next().unwrap_or(path);
            let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
            return Self::from_parts(&parts, input);
        }

        let rest = input
            .strip_prefix("spotify:")
            .ok_or_else(|| LinkError::Unrecognised(input.to_string()))?;
        let parts: Vec<&str> = rest.split(':').collect();
        Self::from_parts(&parts, input)
    }

    fn from_parts(parts: &[&str], input: &str) -> Result<Self, LinkError> {
        let link = match parts {
            ["track", id] => Link::Track(valid_id(id, input)?),
            ["album", id] => Link::Album(valid_id(id, input)?),
            ["artist", id] => Link::Artist(valid_id(id, input)?),
            ["playlist", id] => Link::Playlist {
                user: None,
                id: valid_id(id, input)?,
            },
            ["user", user, "playlist", id] => Link::Playlist {
                user: Some(valid_user(user, input)?),
                id: valid_id(id, input)?,
            },
            ["user", user] => Link::User(valid_user(user, input)?),
            _ => return Err(LinkError::Unrecognised(input.to_string())),
        };
        Ok(link)
    }

    pub fn kind(&self) -> LinkKind {
        match self {
            Link::Track(_) => LinkKind::Track,
            Link::Album(_) => LinkKind::Album,
            Link::Artist(_) => LinkKind::Artist,
            Link::Playlist { .. } => LinkKind::Playlist,
            Link::User(_) => LinkKind::User,
        }
    }
}

impl fmt::Display for Link {
    /// The canonical `spotify:` URI.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Link::Track(id) => write!(f, "spotify:track:{id}"),
            Link::Album(id) => write!(f, "spotify:album:{id}"),
            Link::Artist(id) => write!(f, "spotify:artist:{id}"),
            Link::Playlist { user: Some(user), id } => {
                write!(f, "spotify:user:{user}:playlist:{id}")
            }
            Link::Playlist { user: None, id } => write!(f, "spotify:playlist:{id}"),
            Link::User(user) => write!(f, "spotify:user:{user}"),
        }
    }
}

fn valid_id(id: &str, input: &str) -> Result<String, LinkError> {
    if id.len() == ID_LEN && id.bytes().all(|b| b.is_ascii_alphanumeric()) {
        Ok(id.to_string())
    } else {
        Err(LinkError::InvalidId(input.to_string()))
    }
}

fn valid_user(user: &str, input: &str) -> Result<String, LinkError> {
    if !user.is_empty() && !user.contains(char::is_whitespace) {
        Ok(user.to_string())
    } else {
        Err(LinkError::Unrecognised(input.to_string()))
    }
}
