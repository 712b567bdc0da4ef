
use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::File;
use std::path::{Path, PathBuf};

enum Mapping {
    Empty,
    ReadOnly(Mmap),
    Writable(MmapMut),
}

/// Memory-mapped view of one dataset file, opened either read-only or read-write.
pub struct Backing {
    path: PathBuf,
    // Keeps the descriptor alive for the lifetime of the mapping.
    _file: File,
    map: Mapping,
    len: u64,
}

impl Backing {
    /// Map an existing file read-only at its current length.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or mapped.
    pub fn open_read_only(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::OpenOptions::new().read(true).open(path)?;
        let len = file.metadata()?.len();

        let map = if len == 0 {
            Mapping::Empty
        } else {
            let map_len = usize::try_from(len)
                .map_err(|_| anyhow::anyhow!("file length {len} exceeds addressable size"))?;
            Mapping::ReadOnly(unsafe { MmapOptions::new().len(map_len).map(&file)? })
        };

        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
            map,
            len,
        })
    }

    /// Open (creating if needed) and map a file read-write, growing it to at least `min_len`.
    ///
    /// Existing contents are kept; grown space reads as zeros.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created, sized, or mapped.
    pub fn open_writable(path: &Path, min_len: u64) -> anyhow::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let prev_len = file.metadata().map(|m| m.len()).unwrap_or(0);
        let len = prev_len.max(min_len);
        if len != prev_len {
            file.set_len(len)?;
        }

        let map = if len == 0 {
            Mapping::Empty
        } else {
            let map_len = usize::try_from(len)
                .map_err(|_| anyhow::anyhow!("file length {len} exceeds addressable size"))?;
            Mapping::Writable(unsafe { MmapOptions::new().len(map_len).map_mut(&file)? })
        };

        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
            map,
            len,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn is_writable(&self) -> bool {
        matches!(self.map, Mapping::Writable(_))
    }

    fn bytes(&self) -> &[u8] {
        match &self.map {
            Mapping::Empty => &[],
            Mapping::ReadOnly(m) => &m[..],
            Mapping::Writable(m) => &m[..],
        }
    }

    /// Copy bytes starting at `off` into `buf`, returning how many were available.
    pub fn read_at(&self, off: u64, buf: &mut [u8]) -> usize {
        let src = self.bytes();
        let Ok(off) = usize::try_from(off) else {
            return 0;
        };
        if off >= src.len() {
            return 0;
        }
        let end = off.saturating_add(buf.len()).min(src.len());
        let n = end - off;
        buf[..n].copy_from_slice(&src[off..end]);
        n
    }

    /// Copy `data` to `off`, returning how many bytes fit. Read-only mappings accept nothing.
    pub fn write_at(&mut self, off: u64, data: &[u8]) -> usize {
        let Mapping::Writable(map) = &mut self.map else {
            return 0;
        };
        let Ok(off) = usize::try_from(off) else {
            return 0;
        };
        if off >= map.len() {
            return 0;
        }
        let end = off.saturating_add(data.len()).min(map.len());
        let n = end - off;
        map[off..end].copy_from_slice(&data[..n]);
        n
    }

    /// Flush modified pages of a writable mapping to the file.
    ///
    /// # Errors
    /// Returns an error if the OS rejects the flush.
    pub fn flush(&self) -> anyhow::Result<()> {
        if let Mapping::Writable(map) = &self.map {
            map.flush()?;
        }
        Ok(())
    }
}
