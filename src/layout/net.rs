//! Layouts of the DNS, HTTP and raw packet tables

use super::{put_bytes, take_bytes, Layout};
use crate::{KitError, Result};
use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use ebpfkit_common::{
    http_action, DNS_NAME_LEN, HTTP_DATA_LEN, HTTP_RESP_PATTERN_LEN, HTTP_ROUTE_KEY_LEN,
    RAW_PACKET_LEN,
};
use std::io::Cursor;
use std::mem;
use std::net::Ipv4Addr;

const MAX_LABEL_LEN: usize = 63;

/// Hostname in DNS wire format: length-prefixed labels ending with the
/// root label, zero padded to `DNS_NAME_LEN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsName(pub String);

impl DnsName {
    pub fn new(name: &str) -> Self {
        Self(name.trim_end_matches('.').to_string())
    }
}

impl Layout for DnsName {
    const NAME: &'static str = "dns name";
    const WIDTH: usize = DNS_NAME_LEN;

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        let mut wire = Vec::with_capacity(self.0.len() + 2);
        for label in self.0.split('.') {
            if label.is_empty() || label.len() > MAX_LABEL_LEN {
                return Err(KitError::layout(
                    Self::NAME,
                    format!("label {:?} of {:?} must be 1 to 63 bytes", label, self.0),
                ));
            }
            wire.push(label.len() as u8);
            wire.extend_from_slice(label.as_bytes());
        }
        wire.push(0);
        // The name must keep at least one trailing zero byte
        if wire.len() >= DNS_NAME_LEN {
            return Err(KitError::layout(
                Self::NAME,
                format!("{:?} is too long", self.0),
            ));
        }
        put_bytes(buf, Self::NAME, &wire, DNS_NAME_LEN)
    }

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let raw = take_bytes(cursor, DNS_NAME_LEN)?;
        let mut labels = Vec::new();
        let mut pos = 0;
        loop {
            let len = *raw
                .get(pos)
                .ok_or_else(|| KitError::layout(Self::NAME, "missing root label"))?
                as usize;
            if len == 0 {
                break;
            }
            let label = raw
                .get(pos + 1..pos + 1 + len)
                .ok_or_else(|| KitError::layout(Self::NAME, "label overruns the buffer"))?;
            labels.push(
                std::str::from_utf8(label)
                    .map_err(|e| KitError::layout(Self::NAME, format!("not UTF-8: {}", e)))?,
            );
            pos += 1 + len;
        }
        Ok(Self(labels.join(".")))
    }
}

/// IPv4 address stored in network byte order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Value(pub Ipv4Addr);

impl Layout for Ipv4Value {
    const NAME: &'static str = "ipv4";
    const WIDTH: usize = 4;

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&self.0.octets());
        Ok(())
    }

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let raw = take_bytes(cursor, 4)?;
        Ok(Self(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3])))
    }
}

/// Exact request prefix such as `GET /add_fswatch`. Must fill the key
/// width exactly; shorter keys could never match a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRouteKey(pub String);

impl Layout for HttpRouteKey {
    const NAME: &'static str = "http route key";
    const WIDTH: usize = HTTP_ROUTE_KEY_LEN;

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        exact_ascii(buf, Self::NAME, &self.0, HTTP_ROUTE_KEY_LEN)
    }

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        read_ascii(cursor, Self::NAME, HTTP_ROUTE_KEY_LEN).map(Self)
    }
}

/// Status line prefix of the responses rewritten on egress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponsePattern(pub String);

impl Layout for HttpResponsePattern {
    const NAME: &'static str = "http response pattern";
    const WIDTH: usize = HTTP_RESP_PATTERN_LEN;

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        exact_ascii(buf, Self::NAME, &self.0, HTTP_RESP_PATTERN_LEN)
    }

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        read_ascii(cursor, Self::NAME, HTTP_RESP_PATTERN_LEN).map(Self)
    }
}

fn exact_ascii(buf: &mut Vec<u8>, layout: &'static str, s: &str, width: usize) -> Result<()> {
    if !s.is_ascii() || s.len() != width {
        return Err(KitError::layout(
            layout,
            format!("{:?} must be exactly {} ASCII bytes", s, width),
        ));
    }
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn read_ascii(cursor: &mut Cursor<&[u8]>, layout: &'static str, width: usize) -> Result<String> {
    let raw = take_bytes(cursor, width)?;
    if !raw.is_ascii() {
        return Err(KitError::layout(layout, "not ASCII"));
    }
    String::from_utf8(raw).map_err(|e| KitError::layout(layout, e.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpAction {
    Nop,
    Drop,
    Edit,
}

impl HttpAction {
    fn tag(self) -> u32 {
        match self {
            HttpAction::Nop => http_action::NOP,
            HttpAction::Drop => http_action::DROP,
            HttpAction::Edit => http_action::EDIT,
        }
    }

    fn from_tag(tag: u32) -> Result<Self> {
        match tag {
            http_action::NOP => Ok(HttpAction::Nop),
            http_action::DROP => Ok(HttpAction::Drop),
            http_action::EDIT => Ok(HttpAction::Edit),
            other => Err(KitError::layout(
                "http route",
                format!("unknown action {}", other),
            )),
        }
    }
}

/// What happens to a request matching an `HttpRouteKey`. `new_data`
/// replaces the first `new_data.len()` bytes of the request; its length is
/// carried in the length field, so zero bytes inside it are data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRoute {
    pub action: HttpAction,
    pub handler: u32,
    pub new_data: Vec<u8>,
}

impl HttpRoute {
    pub fn edit(handler: u32, new_data: &[u8]) -> Self {
        Self {
            action: HttpAction::Edit,
            handler,
            new_data: new_data.to_vec(),
        }
    }
}

impl Layout for HttpRoute {
    const NAME: &'static str = "http route";
    const WIDTH: usize = mem::size_of::<ebpfkit_common::HttpRoute>();

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u32::<NativeEndian>(self.action.tag())?;
        buf.write_u32::<NativeEndian>(self.handler)?;
        buf.write_u32::<NativeEndian>(self.new_data.len() as u32)?;
        put_bytes(buf, Self::NAME, &self.new_data, HTTP_DATA_LEN)
    }

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let action = HttpAction::from_tag(cursor.read_u32::<NativeEndian>()?)?;
        let handler = cursor.read_u32::<NativeEndian>()?;
        let len = cursor.read_u32::<NativeEndian>()? as usize;
        if len > HTTP_DATA_LEN {
            return Err(KitError::layout(
                Self::NAME,
                format!("replacement length {} exceeds {}", len, HTTP_DATA_LEN),
            ));
        }
        let mut new_data = take_bytes(cursor, HTTP_DATA_LEN)?;
        new_data.truncate(len);
        Ok(Self {
            action,
            handler,
            new_data,
        })
    }
}

/// Packet template sent by the network programs, patched at runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub data: Vec<u8>,
}

impl Layout for RawPacket {
    const NAME: &'static str = "raw packet";
    const WIDTH: usize = mem::size_of::<ebpfkit_common::RawPacket>();

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u32::<NativeEndian>(self.data.len() as u32)?;
        put_bytes(buf, Self::NAME, &self.data, RAW_PACKET_LEN)
    }

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let len = cursor.read_u32::<NativeEndian>()? as usize;
        if len > RAW_PACKET_LEN {
            return Err(KitError::layout(
                Self::NAME,
                format!("length {} exceeds {}", len, RAW_PACKET_LEN),
            ));
        }
        let mut data = take_bytes(cursor, RAW_PACKET_LEN)?;
        data.truncate(len);
        Ok(Self { data })
    }
}
