use std::fmt;

/// Error type returned by the wave asset parser (`wave::load`).
#[derive(Debug)]
pub enum WaveError {
    /// Underlying file I/O failed.
    Io(std::io::Error),
    /// The file is not a well-formed RIFF/WAVE or `.bin` asset, or uses an
    /// unsupported sample format.
    FormatError(String),
}

impl fmt::Display for WaveError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            WaveError::Io(ref e) => write!(f, "I/O error reading wave asset: {}", e),
            WaveError::FormatError(ref s) => write!(f, "malformed wave asset: {}", s),
        }
    }
}

impl std::error::Error for WaveError {}

impl From<std::io::Error> for WaveError {
    fn from(e: std::io::Error) -> Self {
        WaveError::Io(e)
    }
}

/// Error type for the voicegroup loader and everything it touches
/// (discovery, symbol indexing, macro parsing, wave loading).
#[derive(Debug)]
pub enum LoaderError {
    /// A voicegroup name, sample symbol, or required project file could
    /// not be located.
    NotFound(String),
    /// Malformed RIFF, unsupported PCM width, truncated `.bin`/`.pcm`
    /// header, or a malformed persisted-state blob.
    FormatError(String),
    /// Underlying filesystem failure.
    Io(std::io::Error),
    /// Allocation failure building the voice graph (only ever returned
    /// by the loader; the audio path never allocates).
    OutOfMemory,
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            LoaderError::NotFound(ref s) => write!(f, "not found: {}", s),
            LoaderError::FormatError(ref s) => write!(f, "format error: {}", s),
            LoaderError::Io(ref e) => write!(f, "I/O error: {}", e),
            LoaderError::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

impl std::error::Error for LoaderError {}

impl From<std::io::Error> for LoaderError {
    fn from(e: std::io::Error) -> Self {
        LoaderError::Io(e)
    }
}

impl From<WaveError> for LoaderError {
    fn from(e: WaveError) -> Self {
        match e {
            WaveError::Io(io) => LoaderError::Io(io),
            WaveError::FormatError(s) => LoaderError::FormatError(s),
        }
    }
}
