//! Layouts of the pipe and file watch tables

use super::{put_bytes, put_cstr, put_str, take_bytes, take_cstr, Layout};
use crate::{KitError, Result};
use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use ebpfkit_common::{CommPair as RawCommPair, FS_WATCH_PATH_LEN, PIPED_SCRIPT_LEN, TASK_COMM_LEN};
use std::io::Cursor;
use std::mem;

/// Writer and reader comms of a pipe, e.g. `cat | python`.
/// An empty writer matches any writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommPair {
    pub from: String,
    pub to: String,
}

impl CommPair {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl Layout for CommPair {
    const NAME: &'static str = "comm pair";
    const WIDTH: usize = mem::size_of::<RawCommPair>();

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        put_cstr(buf, Self::NAME, &self.from, TASK_COMM_LEN)?;
        put_cstr(buf, Self::NAME, &self.to, TASK_COMM_LEN)
    }

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        Ok(Self {
            from: take_cstr(cursor, Self::NAME, TASK_COMM_LEN)?,
            to: take_cstr(cursor, Self::NAME, TASK_COMM_LEN)?,
        })
    }
}

/// Program injected into a pipe, and whether the original data is kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommProgram {
    pub prog_key: u32,
    pub backup: bool,
}

impl Layout for CommProgram {
    const NAME: &'static str = "comm program";
    const WIDTH: usize = mem::size_of::<ebpfkit_common::CommProgram>();

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u32::<NativeEndian>(self.prog_key)?;
        buf.write_u32::<NativeEndian>(self.backup as u32)?;
        Ok(())
    }

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let prog_key = cursor.read_u32::<NativeEndian>()?;
        let backup = match cursor.read_u32::<NativeEndian>()? {
            0 => false,
            1 => true,
            other => {
                return Err(KitError::layout(
                    Self::NAME,
                    format!("backup flag {} is not 0 or 1", other),
                ))
            }
        };
        Ok(Self { prog_key, backup })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipedProgram {
    pub script: String,
}

impl PipedProgram {
    pub fn new(script: &str) -> Self {
        Self {
            script: script.to_string(),
        }
    }
}

impl Layout for PipedProgram {
    const NAME: &'static str = "piped program";
    const WIDTH: usize = mem::size_of::<ebpfkit_common::PipedProgram>();

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u32::<NativeEndian>(self.script.len() as u32)?;
        put_bytes(buf, Self::NAME, self.script.as_bytes(), PIPED_SCRIPT_LEN)
    }

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let len = cursor.read_u32::<NativeEndian>()? as usize;
        if len > PIPED_SCRIPT_LEN {
            return Err(KitError::layout(
                Self::NAME,
                format!("length field {} exceeds {}", len, PIPED_SCRIPT_LEN),
            ));
        }
        let mut raw = take_bytes(cursor, PIPED_SCRIPT_LEN)?;
        raw.truncate(len);
        let script = String::from_utf8(raw)
            .map_err(|e| KitError::layout(Self::NAME, format!("not UTF-8: {}", e)))?;
        Ok(Self { script })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsWatchKey {
    pub flag: u8,
    pub path: String,
}

impl FsWatchKey {
    pub fn new(path: &str) -> Self {
        Self {
            flag: 0,
            path: path.to_string(),
        }
    }
}

impl Layout for FsWatchKey {
    const NAME: &'static str = "fs watch key";
    const WIDTH: usize = mem::size_of::<ebpfkit_common::FsWatchKey>();

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.push(self.flag);
        put_str(buf, Self::NAME, &self.path, FS_WATCH_PATH_LEN)
    }

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        Ok(Self {
            flag: cursor.read_u8()?,
            path: take_cstr(cursor, Self::NAME, FS_WATCH_PATH_LEN)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comm_pair_layout() {
        let pair = CommPair::new("cat", "python3.8");
        let bytes = pair.encode().unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[..4], b"cat\0");
        assert_eq!(&bytes[16..25], b"python3.8");
        assert_eq!(CommPair::decode(&bytes).unwrap(), pair);
    }

    #[test]
    fn test_comm_too_long() {
        let pair = CommPair::new("cat", "a-very-long-command");
        assert!(matches!(
            pair.encode(),
            Err(KitError::InvalidLayout { .. })
        ));
    }

    #[test]
    fn test_piped_program_len_prefix() {
        let prog = PipedProgram::new("print('hello world')");
        let bytes = prog.encode().unwrap();
        assert_eq!(bytes.len(), 512);
        assert_eq!(u32::decode(&bytes[..4]).unwrap(), 20);
        assert_eq!(PipedProgram::decode(&bytes).unwrap(), prog);
    }

    #[test]
    fn test_piped_program_may_fill_width() {
        let prog = PipedProgram::new(&"x".repeat(PIPED_SCRIPT_LEN));
        let bytes = prog.encode().unwrap();
        assert_eq!(PipedProgram::decode(&bytes).unwrap(), prog);

        assert!(PipedProgram::new(&"x".repeat(PIPED_SCRIPT_LEN + 1))
            .encode()
            .is_err());
    }

    #[test]
    fn test_fs_watch_path_may_fill_width() {
        let key = FsWatchKey::new(&"p".repeat(FS_WATCH_PATH_LEN));
        let bytes = key.encode().unwrap();
        assert_eq!(bytes.len(), 257);
        assert_eq!(FsWatchKey::decode(&bytes).unwrap(), key);

        let short = FsWatchKey::new("/ebpfkit/images_list");
        assert_eq!(FsWatchKey::decode(&short.encode().unwrap()).unwrap(), short);
    }

    #[test]
    fn test_comm_program_rejects_bad_backup_flag() {
        let mut bytes = CommProgram {
            prog_key: 1,
            backup: true,
        }
        .encode()
        .unwrap();
        bytes[4] = 7;
        assert!(CommProgram::decode(&bytes).is_err());
    }
}
