//! Deterministic assembly of module fragments into the final artifact.
//!
//! Assembly order is a function of static descriptor data only (ascending
//! priority, then wave, then registration order, then id), never of actual
//! execution order, so an identical module set over an identical context
//! yields a byte-identical artifact regardless of scheduling.

use crate::descriptor::ModuleId;

/// One module's contribution to the artifact, paired with the static facts
/// that determine its position.
#[derive(Clone, Debug)]
pub struct Fragment {
    pub id: ModuleId,
    pub priority: i32,
    pub wave: usize,
    pub registration_index: usize,
    pub content: String,
}

/// Merges successful module outputs into one ordered artifact.
///
/// # Examples
///
/// ```
/// use promptloom::assembler::{ContentAssembler, Fragment};
/// use promptloom::descriptor::ModuleId;
///
/// let fragments = vec![
///     Fragment {
///         id: ModuleId::new("footer"),
///         priority: 90,
///         wave: 0,
///         registration_index: 0,
///         content: "End of definition.".into(),
///     },
///     Fragment {
///         id: ModuleId::new("header"),
///         priority: 10,
///         wave: 0,
///         registration_index: 1,
///         content: "Definition of terms".into(),
///     },
/// ];
///
/// let artifact = ContentAssembler::new().assemble(fragments);
/// assert_eq!(artifact, "Definition of terms\n\nEnd of definition.");
/// ```
#[derive(Clone, Debug, Default)]
pub struct ContentAssembler;

impl ContentAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Join fragments with a single blank-line separator, ordered by
    /// ascending priority (wave, registration order, and id as tie-breakers).
    /// Fragments with empty content contribute no separator.
    #[must_use]
    pub fn assemble(&self, mut fragments: Vec<Fragment>) -> String {
        fragments.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.wave.cmp(&b.wave))
                .then_with(|| a.registration_index.cmp(&b.registration_index))
                .then_with(|| a.id.cmp(&b.id))
        });

        let parts: Vec<&str> = fragments
            .iter()
            .map(|f| f.content.as_str())
            .filter(|c| !c.is_empty())
            .collect();

        tracing::debug!(
            fragments = fragments.len(),
            emitted = parts.len(),
            "assembling artifact"
        );
        parts.join("\n\n")
    }
}
