use crate::error::{GenotypeError, Result};
use log::debug;
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A trait that abstracts sequential, line-oriented access to text data such as
/// `.bim` and `.fam` files, regardless of the underlying storage medium.
pub trait TextSource: Send {
    fn next_line<'a>(&'a mut self) -> Result<Option<&'a [u8]>>;
}

/// A trait that abstracts byte-range access for `.bed` data, regardless of the
/// underlying storage mechanism.
pub trait ByteRangeSource: Send + Sync {
    fn len(&self) -> u64;
    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<()>;
}

/// A cheaply clonable handle over the bytes of one `.bed` file.
#[derive(Clone)]
pub struct BedSource {
    byte_source: Arc<dyn ByteRangeSource>,
    path: PathBuf,
}

impl BedSource {
    pub fn len(&self) -> u64 {
        self.byte_source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<()> {
        self.byte_source.read_at(offset, dst)
    }
}

impl std::fmt::Debug for BedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BedSource")
            .field("path", &self.path)
            .field("len", &self.len())
            .finish()
    }
}

/// Creates a memory-mapped `BedSource` for the provided `.bed` path.
pub fn open_bed_source(path: &Path) -> Result<BedSource> {
    let file = File::open(path).map_err(|e| GenotypeError::io(path, e))?;
    let len = file
        .metadata()
        .map_err(|e| GenotypeError::io(path, e))?
        .len();
    let byte_source: Arc<dyn ByteRangeSource> = if len == 0 {
        Arc::new(EmptyByteRangeSource)
    } else {
        // SAFETY: the mapping is read-only and the engine never writes to genotype files.
        let mmap = unsafe { Mmap::map(&file).map_err(|e| GenotypeError::io(path, e))? };
        #[cfg(unix)]
        mmap.advise(memmap2::Advice::Sequential)
            .map_err(|e| GenotypeError::io(path, e))?;
        Arc::new(MmapByteRangeSource {
            mmap,
            path: path.to_path_buf(),
        })
    };
    debug!("Mapped {} ({} bytes)", path.display(), len);
    Ok(BedSource {
        byte_source,
        path: path.to_path_buf(),
    })
}

/// Opens a local text file for line-by-line streaming.
pub fn open_text_source(path: &Path) -> Result<Box<dyn TextSource>> {
    let file = File::open(path).map_err(|e| GenotypeError::io(path, e))?;
    Ok(Box::new(LocalTextSource::new(path, file)))
}

/// Appends an extension to a fileset prefix without clobbering dots already present in
/// the prefix (`data.chr1` + `bed` is `data.chr1.bed`, not `data.bed`).
pub fn with_suffix(prefix: &Path, extension: &str) -> PathBuf {
    let mut path = prefix.as_os_str().to_owned();
    path.push(".");
    path.push(extension);
    PathBuf::from(path)
}

struct EmptyByteRangeSource;

impl ByteRangeSource for EmptyByteRangeSource {
    fn len(&self) -> u64 {
        0
    }

    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<()> {
        if offset == 0 && dst.is_empty() {
            return Ok(());
        }
        Err(GenotypeError::Io {
            path: "<empty .bed>".to_string(),
            message: "Attempted to read from an empty file".to_string(),
        })
    }
}

struct MmapByteRangeSource {
    mmap: Mmap,
    path: PathBuf,
}

impl ByteRangeSource for MmapByteRangeSource {
    fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<()> {
        let end = offset
            .checked_add(dst.len() as u64)
            .ok_or_else(|| GenotypeError::io(&self.path, "Offset overflow while reading mmap"))?;
        if end > self.mmap.len() as u64 {
            return Err(GenotypeError::io(
                &self.path,
                format!(
                    "Attempted to read bytes {offset}..{end} past the end of the file ({} bytes)",
                    self.mmap.len()
                ),
            ));
        }
        dst.copy_from_slice(&self.mmap[offset as usize..end as usize]);
        Ok(())
    }
}

struct LocalTextSource {
    reader: BufReader<File>,
    line: Vec<u8>,
    line_active: bool,
    path: PathBuf,
}

impl LocalTextSource {
    fn new(path: &Path, file: File) -> Self {
        Self {
            reader: BufReader::new(file),
            line: Vec::with_capacity(1024),
            line_active: false,
            path: path.to_path_buf(),
        }
    }
}

impl TextSource for LocalTextSource {
    fn next_line<'a>(&'a mut self) -> Result<Option<&'a [u8]>> {
        if self.line_active {
            self.line.clear();
            self.line_active = false;
        }

        let bytes_read = self
            .reader
            .read_until(b'\n', &mut self.line)
            .map_err(|e| GenotypeError::io(&self.path, e))?;

        if bytes_read == 0 {
            return Ok(None);
        }

        if self.line.last() == Some(&b'\n') {
            self.line.pop();
        }
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }

        self.line_active = true;
        Ok(Some(&self.line))
    }
}

/// Decodes one line as UTF-8, reporting the file and 1-based row on failure.
pub fn line_as_str<'a>(path: &Path, line_number: usize, raw: &'a [u8]) -> Result<&'a str> {
    std::str::from_utf8(raw).map_err(|err| {
        GenotypeError::malformed(path, Some(line_number), format!("line is not valid UTF-8: {err}"))
    })
}
