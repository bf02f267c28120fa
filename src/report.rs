use crate::reconstruct::LoadSummary;

/// How the consolidated notice of a load should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Error,
    Info,
}

/// The human readable outcome of a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub messages: Vec<String>,
    /// Whether every declared image was recovered, nothing was skipped and nothing was left over.
    pub success: bool,
}

impl ReconciliationReport {
    pub fn severity(&self) -> Notice {
        if self.success {
            Notice::Info
        } else {
            Notice::Error
        }
    }
}

fn counted(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("1 {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

fn images(count: usize) -> String {
    counted(count, "image")
}

/// Turns the summary of a load into the ordered messages shown to the user.
pub fn reconcile(summary: &LoadSummary) -> ReconciliationReport {
    let mut messages = Vec::new();

    for (segment, tally) in &summary.segments {
        if tally.expected != tally.received {
            messages.push(format!(
                "Segment {segment}: expected {}, received {}.",
                images(tally.expected),
                tally.received
            ));
        }
    }
    if summary.used_fallback {
        messages.push(
            "Some images were matched to their segment by document order and may be misplaced."
                .into(),
        );
    }
    if summary.skipped > 0 {
        messages.push(format!(
            "{} could not be extracted from the document.",
            images(summary.skipped)
        ));
    }
    if summary.leftover > 0 {
        messages.push(format!(
            "Dropped {} found in the document that did not belong to any segment.",
            images(summary.leftover)
        ));
    }

    let success = summary.skipped == 0
        && summary.leftover == 0
        && summary
            .segments
            .values()
            .all(|tally| tally.expected == tally.received);
    if success {
        let non_empty_segments = summary
            .segments
            .values()
            .filter(|tally| tally.received > 0)
            .count();
        messages.push(format!(
            "Loaded {} across {}.",
            images(summary.received_total()),
            counted(non_empty_segments, "segment")
        ));
    }

    ReconciliationReport { messages, success }
}
