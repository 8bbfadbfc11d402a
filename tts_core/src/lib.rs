//! Building blocks of the speech API: request fingerprints, the bounded audio
//! cache, the on-disk artifact store and the synthesis engine adapters.

pub mod cache;
pub mod fingerprint;
pub mod store;
pub mod synth;
pub mod text;
pub mod wav;

pub use cache::{AudioCache, CacheEntry, CacheStatus, ClearReport, EntryStatus};
pub use fingerprint::{Fingerprint, ParseFingerprintError, FINGERPRINT_TEXT_LIMIT};
pub use store::{ArtifactStore, PendingArtifact, StorageError};
#[cfg(feature = "piper")]
pub use synth::PiperSynthesizer;
pub use synth::{EspeakSynthesizer, SynthesisError, SynthesisRequest, Synthesizer, Voice};
