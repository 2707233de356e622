use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_MAX_LABELS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSuggestion {
    pub label: String,
    /// Number of neighbors carrying the label
    pub frequency: usize,
}

/// Rank the labels of a neighbor set by how many neighbors carry them.
///
/// Ties keep the order in which labels were first seen, so the labels of the
/// best ranked neighbors win.
pub fn suggest<'a, I>(neighbor_labels: I, max_labels: usize) -> Vec<LabelSuggestion>
where
    I: IntoIterator<Item = &'a [String]>,
{
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();

    for labels in neighbor_labels {
        let mut seen_here: Vec<&str> = Vec::with_capacity(labels.len());
        for label in labels {
            let label = label.as_str();
            if seen_here.contains(&label) {
                continue;
            }
            seen_here.push(label);

            let count = counts.entry(label).or_insert(0);
            if *count == 0 {
                order.push(label);
            }
            *count += 1;
        }
    }

    let mut suggestions: Vec<LabelSuggestion> = order
        .into_iter()
        .map(|label| LabelSuggestion {
            label: label.to_string(),
            frequency: counts[label],
        })
        .collect();

    // stable, so first-seen order breaks ties
    suggestions.sort_by(|a, b| b.frequency.cmp(&a.frequency));
    suggestions.truncate(max_labels);
    suggestions
}
