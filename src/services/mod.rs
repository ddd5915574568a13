//! Pipeline services.
//!
//! Each service owns one stage of the pipeline and talks to disk only
//! through the [`DocumentStore`](crate::storage::DocumentStore):
//!
//! | Service | Reads | Writes |
//! |---------|-------|--------|
//! | [`Encoder`] | context, transcripts | `episodic/` |
//! | [`Extractor`] | `episodic/` | `semantic/` |
//! | [`Synthesizer`] | `semantic/` | `rules/`, `procedural/` |
//! | [`RecoveryManager`] | everything | `.backup/`, rebuilt tiers |

mod deadline;
mod encoder;
mod extractor;
mod index;
mod recovery;
mod synthesizer;
mod transcript;

pub use deadline::Deadline;
pub use encoder::{
    ConversationContext, EncodeOutcome, EncodeReport, EncodeRequest, Encoder, MINIMAL_SUMMARY,
};
pub use extractor::{ExtractionOutcome, ExtractionReport, Extractor, detect_patterns, pattern_id};
pub use index::IndexService;
pub use recovery::{RecoveryManager, RecoveryReport, RepairReport, ResetReport};
pub use synthesizer::{
    PlannedRule, SynthesisOutcome, SynthesisPlan, SynthesisReport, Synthesizer,
};
pub use transcript::{
    MAX_TRANSCRIPT_LINES, ParseDiagnostic, ParsedTranscript, TranscriptDigest, locate_transcript,
    parse_transcript, project_slug,
};
