//! On-disk layout of an OSCORE security context: a directory holding
//! `secret.json` (the pre-shared inputs) and `sequence.json` (the
//! mutable counters).
//!
//! Both files are rewritten atomically (write to a temp file in the
//! same directory, then rename over the target) so a crash can leave
//! behind a stale file but never a torn one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// The pre-shared half of a security context, as stored in
/// `secret.json`. Byte strings are JSON arrays of numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretFile {
  /// The OSCORE Master Secret
  #[serde(rename = "master-secret")]
  pub master_secret: Vec<u8>,

  /// The OSCORE Master Salt (may be empty)
  #[serde(rename = "master-salt", default)]
  pub master_salt: Vec<u8>,

  /// The ID Context, when one distinguishes this context
  #[serde(rename = "id-context", default)]
  pub id_context: Option<Vec<u8>>,

  /// Our Sender ID (the peer's Recipient ID)
  #[serde(rename = "sender-id")]
  pub sender_id: Vec<u8>,

  /// Our Recipient ID (the peer's Sender ID)
  #[serde(rename = "recipient-id")]
  pub recipient_id: Vec<u8>,

  /// AEAD algorithm name; only AES-CCM-16-64-128 is supported
  #[serde(rename = "aead-algorithm", default = "default_aead")]
  pub aead: String,

  /// HKDF algorithm name; only HKDF-SHA256 is supported
  #[serde(rename = "hkdf-algorithm", default = "default_hkdf")]
  pub hkdf: String,
}

fn default_aead() -> String {
  "AES-CCM-16-64-128".into()
}

fn default_hkdf() -> String {
  "HKDF-SHA256".into()
}

/// The mutable half of a security context, as stored in
/// `sequence.json`.
///
/// `next` is a *high water mark*: every sequence number below it is
/// burned, whether or not it ever hit the wire. The in-memory
/// counter flushes here *before* using a number, so after any crash
/// the file can only ever be ahead of the wire, never behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceFile {
  /// First sender sequence number not yet promised to this file
  #[serde(rename = "next-sender-sequence-number")]
  pub next: u64,

  /// Persisted [`super::replay::ReplayWindow`] bitmask
  #[serde(rename = "replay-window-bitmask")]
  pub bitmask: u32,

  /// Persisted [`super::replay::ReplayWindow`] high water mark
  #[serde(rename = "replay-window-high")]
  pub high: u64,

  /// True only when the context was shut down in an orderly way;
  /// a context loaded with this unset goes through the echo-guarded
  /// recovery of RFC8613 appendix B.1
  #[serde(rename = "clean-shutdown", default)]
  pub clean: bool,
}

/// Handle on the directory a context persists itself into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextStore {
  dir: PathBuf,
  /// How many sequence numbers one flush reserves; larger batches
  /// cost fewer writes and waste more numbers on reload
  pub batch: u64,
}

impl ContextStore {
  /// A store rooted at `dir`, flushing every sequence number
  /// individually
  pub fn new<P: AsRef<Path>>(dir: P) -> Self {
    Self::with_batch(dir, 1)
  }

  /// A store that reserves `batch` sequence numbers per flush
  pub fn with_batch<P: AsRef<Path>>(dir: P, batch: u64) -> Self {
    Self { dir: dir.as_ref().to_path_buf(),
           batch: batch.max(1) }
  }

  fn secret_path(&self) -> PathBuf {
    self.dir.join("secret.json")
  }

  fn sequence_path(&self) -> PathBuf {
    self.dir.join("sequence.json")
  }

  /// Read `secret.json`
  pub fn read_secret(&self) -> io::Result<SecretFile> {
    let bytes = fs::read(self.secret_path())?;
    serde_json::from_slice(&bytes).map_err(io::Error::from)
  }

  /// Write `secret.json` (atomically)
  pub fn write_secret(&self, secret: &SecretFile) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(secret).map_err(io::Error::from)?;
    write_atomic(&self.secret_path(), &bytes)
  }

  /// Read `sequence.json`
  pub fn read_sequence(&self) -> io::Result<SequenceFile> {
    let bytes = fs::read(self.sequence_path())?;
    serde_json::from_slice(&bytes).map_err(io::Error::from)
  }

  /// Write `sequence.json` (atomically)
  pub fn write_sequence(&self, seq: &SequenceFile) -> io::Result<()> {
    fs::create_dir_all(&self.dir)?;
    let bytes = serde_json::to_vec_pretty(seq).map_err(io::Error::from)?;
    write_atomic(&self.sequence_path(), &bytes)
  }
}

/// Write-to-temp then rename; the target is either the old content
/// or the new content, nothing in between.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
  let tmp = path.with_extension("json.tmp");
  fs::write(&tmp, bytes)?;
  fs::rename(&tmp, path)
}
