use std::io;
use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// How many bytes are pulled from the file descriptor per read call.
///
/// Sized as a balance between syscall count and memory footprint: the
/// decoder consumes one byte at a time, so anything much larger only
/// delays the first token without reducing work.
const FILE_BUFFER_SIZE: usize = 256;

/// Uniform pull-based access to the raw bytes of a document, whether
/// they come from an open file or were already in memory.
///
/// End of input is reported as `Ok(None)` and is sticky: pulling past
/// the end keeps returning `Ok(None)`. Read failures surface as `Err`,
/// never as an in-band sentinel value.
pub(crate) enum ByteStream {
    File(FileBytes),
    Memory(MemoryBytes),
}

pub(crate) struct FileBytes {
    file: File,
    buffer: [u8; FILE_BUFFER_SIZE],
    filled: usize,
    consumed: usize,
    reached_end: bool,
}

pub(crate) struct MemoryBytes {
    bytes: Box<[u8]>,
    consumed: usize,
}

impl ByteStream {
    pub(crate) async fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path).await?;
        Ok(Self::File(FileBytes {
            file,
            buffer: [0; FILE_BUFFER_SIZE],
            filled: 0,
            consumed: 0,
            reached_end: false,
        }))
    }

    pub(crate) fn from_bytes(bytes: Box<[u8]>) -> Self {
        Self::Memory(MemoryBytes { bytes, consumed: 0 })
    }

    /// Pulls the next raw byte, or `None` once the input is exhausted.
    pub(crate) async fn next_byte(&mut self) -> io::Result<Option<u8>> {
        match self {
            Self::File(file) => file.next_byte().await,
            Self::Memory(memory) => Ok(memory.next_byte()),
        }
    }
}

impl FileBytes {
    async fn next_byte(&mut self) -> io::Result<Option<u8>> {
        if self.consumed == self.filled {
            if self.reached_end {
                return Ok(None);
            }

            let read = self.file.read(&mut self.buffer).await?;
            if read == 0 {
                self.reached_end = true;
                return Ok(None);
            }

            self.filled = read;
            self.consumed = 0;
        }

        let byte = self.buffer[self.consumed];
        self.consumed += 1;
        Ok(Some(byte))
    }
}

impl MemoryBytes {
    fn next_byte(&mut self) -> Option<u8> {
        let byte = self.bytes.get(self.consumed).copied();
        if byte.is_some() {
            self.consumed += 1;
        }
        byte
    }
}
