use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use crossbeam_channel::{Receiver, TryRecvError};

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
pub const PNG_CONTENT_TYPE: &str = "image/png";
pub const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

#[derive(Debug, thiserror::Error)]
pub enum PictureError {
    #[error("could not read picture {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} does not contain PNG image data", .path.display())]
    NotPng { path: PathBuf },
    #[error("picture encoder for {} stopped without a result", .path.display())]
    Abandoned { path: PathBuf },
}

#[derive(Debug, thiserror::Error)]
pub enum PictureDataError {
    #[error("picture data must start with data:image/png;base64,")]
    MissingPrefix,
    #[error("picture payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("picture payload is not a PNG image")]
    NotPng,
}

/// A PNG image inlined as a `data:image/png;base64,` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePicture(String);

impl ProfilePicture {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn decode(&self) -> Result<Vec<u8>, PictureDataError> {
        let payload = self
            .0
            .strip_prefix(PNG_DATA_URI_PREFIX)
            .ok_or(PictureDataError::MissingPrefix)?;
        Ok(STANDARD.decode(payload)?)
    }

    /// Decoded image size in bytes, estimated from the base64 payload.
    pub fn byte_len(&self) -> usize {
        let payload = &self.0[PNG_DATA_URI_PREFIX.len()..];
        let padding = payload.bytes().rev().take_while(|b| *b == b'=').count();
        payload.len() / 4 * 3 - padding
    }
}

impl FromStr for ProfilePicture {
    type Err = PictureDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let picture = Self(s.to_string());
        let bytes = picture.decode()?;
        if !bytes.starts_with(&PNG_SIGNATURE) {
            return Err(PictureDataError::NotPng);
        }
        Ok(picture)
    }
}

impl fmt::Display for ProfilePicture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encodes raw PNG bytes as a data URI, refusing anything without the PNG
/// signature.
pub fn encode_png_bytes(bytes: &[u8]) -> Result<ProfilePicture, PictureDataError> {
    if !bytes.starts_with(&PNG_SIGNATURE) {
        return Err(PictureDataError::NotPng);
    }
    let mut uri = String::with_capacity(PNG_DATA_URI_PREFIX.len() + bytes.len() * 4 / 3 + 4);
    uri.push_str(PNG_DATA_URI_PREFIX);
    STANDARD.encode_string(bytes, &mut uri);
    Ok(ProfilePicture(uri))
}

/// An upload candidate: a path plus whatever content type is known for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureFile {
    path: PathBuf,
    content_type: Option<String>,
}

impl PictureFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Builds a candidate for a file on disk, sniffing its content type from
    /// the leading bytes.
    pub fn probe(path: impl Into<PathBuf>) -> Result<Self, PictureError> {
        let path = path.into();
        let mut header = [0u8; PNG_SIGNATURE.len()];
        let read = fs::File::open(&path)
            .and_then(|mut file| read_prefix(&mut file, &mut header))
            .map_err(|source| PictureError::Read {
                path: path.clone(),
                source,
            })?;
        let content_type = if header[..read] == PNG_SIGNATURE {
            Some(PNG_CONTENT_TYPE.to_string())
        } else {
            None
        };
        Ok(Self { path, content_type })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn has_png_extension(&self) -> bool {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("png"))
            .unwrap_or(false)
    }

    pub fn is_png(&self) -> bool {
        self.content_type() == Some(PNG_CONTENT_TYPE) || self.has_png_extension()
    }
}

fn read_prefix(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Reads a file and encodes it as a PNG data URI on the calling thread.
pub fn encode_file(path: &Path) -> Result<ProfilePicture, PictureError> {
    let bytes = fs::read(path).map_err(|source| PictureError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    encode_png_bytes(&bytes).map_err(|_| PictureError::NotPng {
        path: path.to_path_buf(),
    })
}

/// Starts encoding `file` on a worker thread. The returned handle yields the
/// outcome exactly once.
pub fn spawn_encode(file: &PictureFile) -> PendingPicture {
    let path = file.path().to_path_buf();
    let (tx, rx) = crossbeam_channel::bounded(1);
    let worker_path = path.clone();
    thread::spawn(move || {
        let outcome = encode_file(&worker_path);
        if let Err(err) = &outcome {
            tracing::warn!(%err, "picture encoding failed");
        }
        // The receiver may already be gone if the caller lost interest.
        let _ = tx.send(outcome);
    });
    PendingPicture { path, rx }
}

/// In-flight picture encoding.
#[derive(Debug)]
pub struct PendingPicture {
    path: PathBuf,
    rx: Receiver<Result<ProfilePicture, PictureError>>,
}

impl PendingPicture {
    /// Non-blocking check, for use from a UI tick. `None` while the worker
    /// is still reading.
    pub fn try_resolve(&self) -> Option<Result<ProfilePicture, PictureError>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(PictureError::Abandoned {
                path: self.path.clone(),
            })),
        }
    }

    /// Suspends the caller until the worker finishes. There is no timeout.
    pub fn wait(self) -> Result<ProfilePicture, PictureError> {
        self.rx.recv().unwrap_or_else(|_| {
            Err(PictureError::Abandoned {
                path: self.path.clone(),
            })
        })
    }
}
