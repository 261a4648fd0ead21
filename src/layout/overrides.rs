//! Layouts of the Docker image, PostgreSQL role and SQL query override tables

use super::{put_cstr, put_str, take_bytes, take_cstr, Layout};
use crate::{KitError, Result};
use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use ebpfkit_common::{
    image_action, ping_action, DOCKER_IMAGE_KEY_LEN, DOCKER_IMAGE_LEN, POSTGRES_MD5_LEN,
    POSTGRES_ROLE_LEN, QUERY_PATTERN_LEN,
};
use md5::{Digest, Md5};
use std::io::Cursor;
use std::mem;

/// Image name matched on its first `prefix` bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOverrideKey {
    pub prefix: u32,
    pub image: String,
}

impl ImageOverrideKey {
    /// Match every image starting with `image`
    pub fn prefix_of(image: &str) -> Self {
        Self {
            prefix: image.len() as u32,
            image: image.to_string(),
        }
    }
}

fn check_prefix(prefix: u32, max: usize) -> Result<()> {
    if prefix as usize > max {
        return Err(KitError::PrefixTooLong { prefix, max });
    }
    Ok(())
}

impl Layout for ImageOverrideKey {
    const NAME: &'static str = "image override key";
    const WIDTH: usize = mem::size_of::<ebpfkit_common::ImageOverrideKey>();

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        check_prefix(self.prefix, DOCKER_IMAGE_KEY_LEN)?;
        buf.write_u32::<NativeEndian>(self.prefix)?;
        put_str(buf, Self::NAME, &self.image, DOCKER_IMAGE_KEY_LEN)
    }

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let prefix = cursor.read_u32::<NativeEndian>()?;
        check_prefix(prefix, DOCKER_IMAGE_KEY_LEN)?;
        Ok(Self {
            prefix,
            image: take_cstr(cursor, Self::NAME, DOCKER_IMAGE_KEY_LEN)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageAction {
    Nop,
    Replace,
}

impl ImageAction {
    fn tag(self) -> u16 {
        match self {
            ImageAction::Nop => image_action::NOP,
            ImageAction::Replace => image_action::REPLACE,
        }
    }

    fn from_tag(tag: u16) -> Result<Self> {
        match tag {
            image_action::NOP => Ok(ImageAction::Nop),
            image_action::REPLACE => Ok(ImageAction::Replace),
            other => Err(KitError::layout(
                "image override",
                format!("unknown image action {}", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingAction {
    Nop,
    Crash,
    Run,
    Hit,
}

impl PingAction {
    fn tag(self) -> u16 {
        match self {
            PingAction::Nop => ping_action::NOP,
            PingAction::Crash => ping_action::CRASH,
            PingAction::Run => ping_action::RUN,
            PingAction::Hit => ping_action::HIT,
        }
    }

    fn from_tag(tag: u16) -> Result<Self> {
        match tag {
            ping_action::NOP => Ok(PingAction::Nop),
            ping_action::CRASH => Ok(PingAction::Crash),
            ping_action::RUN => Ok(PingAction::Run),
            ping_action::HIT => Ok(PingAction::Hit),
            other => Err(KitError::layout(
                "image override",
                format!("unknown ping action {}", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOverride {
    pub action: ImageAction,
    pub ping: PingAction,
    pub prefix: u32,
    pub replace_with: String,
}

impl Layout for ImageOverride {
    const NAME: &'static str = "image override";
    const WIDTH: usize = mem::size_of::<ebpfkit_common::ImageOverride>();

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        check_prefix(self.prefix, DOCKER_IMAGE_KEY_LEN)?;
        buf.write_u16::<NativeEndian>(self.action.tag())?;
        buf.write_u16::<NativeEndian>(self.ping.tag())?;
        buf.write_u32::<NativeEndian>(self.prefix)?;
        put_str(buf, Self::NAME, &self.replace_with, DOCKER_IMAGE_LEN)
    }

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let action = ImageAction::from_tag(cursor.read_u16::<NativeEndian>()?)?;
        let ping = PingAction::from_tag(cursor.read_u16::<NativeEndian>()?)?;
        let prefix = cursor.read_u32::<NativeEndian>()?;
        check_prefix(prefix, DOCKER_IMAGE_KEY_LEN)?;
        Ok(Self {
            action,
            ping,
            prefix,
            replace_with: take_cstr(cursor, Self::NAME, DOCKER_IMAGE_LEN)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresRole(pub String);

impl Layout for PostgresRole {
    const NAME: &'static str = "postgres role";
    const WIDTH: usize = POSTGRES_ROLE_LEN;

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        put_cstr(buf, Self::NAME, &self.0, POSTGRES_ROLE_LEN)
    }

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        Ok(Self(take_cstr(cursor, Self::NAME, POSTGRES_ROLE_LEN)?))
    }
}

/// A PostgreSQL md5 password hash: `"md5" || hex(md5(password || role))`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresMd5(String);

impl PostgresMd5 {
    pub fn new(password: &str, role: &str) -> Self {
        let digest = Md5::digest(format!("{}{}", password, role).as_bytes());
        Self(format!("md5{:x}", digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Layout for PostgresMd5 {
    const NAME: &'static str = "postgres md5";
    const WIDTH: usize = POSTGRES_MD5_LEN;

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        if self.0.len() != POSTGRES_MD5_LEN {
            return Err(KitError::layout(
                Self::NAME,
                format!("hash is {} bytes, expected {}", self.0.len(), POSTGRES_MD5_LEN),
            ));
        }
        buf.extend_from_slice(self.0.as_bytes());
        Ok(())
    }

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let raw = take_bytes(cursor, POSTGRES_MD5_LEN)?;
        let hash = String::from_utf8(raw)
            .map_err(|e| KitError::layout(Self::NAME, format!("not UTF-8: {}", e)))?;
        if !hash.starts_with("md5") {
            return Err(KitError::layout(Self::NAME, "missing md5 prefix"));
        }
        Ok(Self(hash))
    }
}

/// SQL text, used both as the matched query and as its replacement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPattern(pub String);

impl Layout for QueryPattern {
    const NAME: &'static str = "query pattern";
    const WIDTH: usize = QUERY_PATTERN_LEN;

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        put_str(buf, Self::NAME, &self.0, QUERY_PATTERN_LEN)
    }

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        take_cstr(cursor, Self::NAME, QUERY_PATTERN_LEN).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_md5_matches_server_format() {
        let hash = PostgresMd5::new("hello", "webapp");
        assert_eq!(hash.as_str().len(), POSTGRES_MD5_LEN);
        assert!(hash.as_str().starts_with("md5"));

        let expected = format!("md5{:x}", Md5::digest(b"hellowebapp"));
        assert_eq!(hash.as_str(), expected);
        assert_eq!(PostgresMd5::decode(&hash.encode().unwrap()).unwrap(), hash);
    }

    #[test]
    fn test_image_override_key_prefix() {
        let key = ImageOverrideKey::prefix_of("debian");
        let bytes = key.encode().unwrap();
        assert_eq!(bytes.len(), 72);
        assert_eq!(u32::decode(&bytes[..4]).unwrap(), 6);
        assert_eq!(ImageOverrideKey::decode(&bytes).unwrap(), key);
    }

    #[test]
    fn test_image_prefix_too_long() {
        let key = ImageOverrideKey {
            prefix: 69,
            image: "debian".to_string(),
        };
        assert!(matches!(
            key.encode(),
            Err(KitError::PrefixTooLong { prefix: 69, max: 68 })
        ));
    }

    #[test]
    fn test_image_key_may_fill_width() {
        let image = "a".repeat(DOCKER_IMAGE_KEY_LEN);
        let key = ImageOverrideKey::prefix_of(&image);
        assert_eq!(key.prefix as usize, DOCKER_IMAGE_KEY_LEN);
        let bytes = key.encode().unwrap();
        assert_eq!(&bytes[4..], image.as_bytes());
        assert_eq!(ImageOverrideKey::decode(&bytes).unwrap(), key);

        let too_long = ImageOverrideKey::prefix_of(&"a".repeat(DOCKER_IMAGE_KEY_LEN + 1));
        assert!(matches!(
            too_long.encode(),
            Err(KitError::PrefixTooLong { prefix: 69, max: 68 })
        ));
    }

    #[test]
    fn test_image_override_round_trip() {
        let value = ImageOverride {
            action: ImageAction::Replace,
            ping: PingAction::Nop,
            prefix: 6,
            replace_with: "ubuntu".to_string(),
        };
        let bytes = value.encode().unwrap();
        assert_eq!(bytes.len(), 72);
        assert_eq!(ImageOverride::decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_query_pattern_fills_width() {
        let query = QueryPattern("SELECT * FROM product WHERE category='defcon'".to_string());
        let bytes = query.encode().unwrap();
        assert_eq!(bytes.len(), QUERY_PATTERN_LEN);
        assert_eq!(QueryPattern::decode(&bytes).unwrap(), query);
    }

    #[test]
    fn test_query_pattern_edges() {
        let full = QueryPattern("q".repeat(QUERY_PATTERN_LEN));
        assert_eq!(QueryPattern::decode(&full.encode().unwrap()).unwrap(), full);

        // An embedded NUL would be cut on decode, so it is refused on encode
        assert!(QueryPattern("SELECT 1\0\0".to_string()).encode().is_err());
    }
}
