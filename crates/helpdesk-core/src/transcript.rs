//! Sealed ticket transcripts.
//!
//! Each ticket gets two artifacts under the transcript directory:
//! - `<id>.json`: the structured [`TranscriptRecord`] (source of truth)
//! - `<id>.txt`: the human-readable export, regenerated from the JSON when missing
//!
//! A record is written once. Later captures for the same ticket return it as-is.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    domain::{GuildId, Member, Ticket, TicketId, TicketKind, UserId},
    errors::Error,
    kinds,
    locks::KeyedLocks,
    persist::{load_json, save_json, write_atomic},
    ports::{ChatPlatform, FileAttachment, HistoryMessage},
    Result,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub author: String,
    pub author_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attachment_urls: Vec<String>,
    #[serde(default)]
    pub embed_summaries: Vec<String>,
}

impl TranscriptEntry {
    fn from_history(m: HistoryMessage) -> Option<Self> {
        if m.content.trim().is_empty()
            && m.attachment_urls.is_empty()
            && m.embed_summaries.is_empty()
        {
            return None;
        }
        Some(Self {
            author: m.author.name,
            author_id: m.author.id,
            content: m.content,
            timestamp: m.timestamp,
            attachment_urls: m.attachment_urls,
            embed_summaries: m.embed_summaries,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub ticket_id: TicketId,
    pub guild: GuildId,
    pub kind: TicketKind,
    pub requester: Member,
    pub sealed_at: DateTime<Utc>,
    pub entries: Vec<TranscriptEntry>,
    /// SHA-256 (hex) over the serialized entries.
    pub digest: String,
}

impl TranscriptRecord {
    pub fn summary(&self) -> TranscriptSummary {
        TranscriptSummary {
            ticket_id: self.ticket_id,
            message_count: self.entries.len(),
            digest: self.digest.clone(),
            sealed_at: self.sealed_at,
        }
    }
}

/// What a closed ticket remembers about its transcript.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSummary {
    pub ticket_id: TicketId,
    pub message_count: usize,
    pub digest: String,
    pub sealed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormattedTranscript {
    pub ticket_id: TicketId,
    pub text: String,
}

impl FormattedTranscript {
    pub fn filename(&self) -> String {
        format!("transcript-{}.txt", self.ticket_id)
    }

    pub fn attachment(&self) -> FileAttachment {
        FileAttachment {
            filename: self.filename(),
            bytes: self.text.clone().into_bytes(),
        }
    }
}

pub struct TranscriptStore {
    platform: Arc<dyn ChatPlatform>,
    dir: PathBuf,
    locks: KeyedLocks<TicketId>,
}

impl TranscriptStore {
    pub fn new(platform: Arc<dyn ChatPlatform>, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            platform,
            dir,
            locks: KeyedLocks::default(),
        })
    }

    fn json_path(&self, id: TicketId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn text_path(&self, id: TicketId) -> PathBuf {
        self.dir.join(format!("{id}.txt"))
    }

    /// Read the ticket channel's history and seal it.
    ///
    /// Returns the stored record untouched if the ticket was already captured.
    /// Transient platform errors are returned as-is so the caller may retry;
    /// anything else becomes [`Error::TranscriptUnavailable`].
    pub async fn capture(&self, ticket: &Ticket) -> Result<TranscriptRecord> {
        let _guard = self.locks.lock(&ticket.id).await;

        if let Some(existing) = self.load(ticket.id)? {
            tracing::debug!("transcript for {} already sealed", ticket.id);
            return Ok(existing);
        }

        let history = match self.platform.fetch_history(ticket.id).await {
            Ok(h) => h,
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => return Err(Error::TranscriptUnavailable(e.to_string())),
        };

        let mut entries: Vec<TranscriptEntry> = history
            .into_iter()
            .filter_map(TranscriptEntry::from_history)
            .collect();
        entries.sort_by_key(|e| e.timestamp);

        let record = TranscriptRecord {
            ticket_id: ticket.id,
            guild: ticket.guild,
            kind: ticket.kind,
            requester: ticket.requester.clone(),
            sealed_at: Utc::now(),
            digest: digest_entries(&entries)?,
            entries,
        };

        save_json(&self.json_path(ticket.id), &record)
            .map_err(|e| Error::TranscriptUnavailable(format!("could not persist: {e}")))?;
        if let Err(e) = write_atomic(&self.text_path(ticket.id), format_record(&record).as_bytes())
        {
            // The JSON is sealed; retrieve() rebuilds the text later.
            tracing::warn!("could not write formatted transcript for {}: {e}", ticket.id);
        }

        tracing::info!(
            "sealed transcript for {} ({} messages)",
            ticket.id,
            record.entries.len()
        );
        Ok(record)
    }

    pub fn load(&self, id: TicketId) -> Result<Option<TranscriptRecord>> {
        load_json(&self.json_path(id))
    }

    /// The human-readable transcript, rebuilt from the structured record if needed.
    pub async fn retrieve(&self, id: TicketId) -> Result<FormattedTranscript> {
        let text_path = self.text_path(id);
        if let Some(text) = read_text(&text_path)? {
            return Ok(FormattedTranscript { ticket_id: id, text });
        }

        let _guard = self.locks.lock(&id).await;
        let Some(record) = self.load(id)? else {
            return Err(Error::NotFound(format!("transcript for ticket {id}")));
        };
        let text = format_record(&record);
        write_atomic(&text_path, text.as_bytes())?;
        tracing::info!("regenerated formatted transcript for {id}");
        Ok(FormattedTranscript { ticket_id: id, text })
    }
}

fn read_text(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(t) => Ok(Some(t)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn digest_entries(entries: &[TranscriptEntry]) -> Result<String> {
    use std::fmt::Write;

    let mut h = Sha256::new();
    h.update(serde_json::to_vec(entries)?);
    let mut out = String::with_capacity(64);
    let digest = h.finalize();
    for b in digest.iter() {
        let _ = write!(&mut out, "{:02x}", b);
    }
    Ok(out)
}

/// Render the human-readable export.
pub fn format_record(record: &TranscriptRecord) -> String {
    let mut out = String::new();
    out.push_str(&format!("Transcript for ticket {}\n", record.ticket_id));
    out.push_str(&format!("Kind: {}\n", kinds::spec(record.kind).title));
    out.push_str(&format!(
        "Requester: {} ({})\n",
        record.requester.name, record.requester.id
    ));
    out.push_str(&format!(
        "Sealed: {}\n",
        record.sealed_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!("Messages: {}\n", record.entries.len()));
    out.push_str(&format!("SHA-256: {}\n", record.digest));
    out.push_str(&"=".repeat(60));
    out.push('\n');

    for e in &record.entries {
        out.push_str(&format!(
            "\n[{}] {} ({}): {}\n",
            e.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            e.author,
            e.author_id,
            e.content
        ));
        for url in &e.attachment_urls {
            out.push_str(&format!("    attachment: {url}\n"));
        }
        for embed in &e.embed_summaries {
            out.push_str(&format!("    embed: {embed}\n"));
        }
    }
    out
}
