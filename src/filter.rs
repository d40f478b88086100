use crate::error::IdentifyError;
use crate::task::Candidate;

/// Keeps candidates strictly above `threshold`, highest confidence first.
///
/// The sort is stable, so equal confidences keep model order.
pub fn filter_candidates(mut candidates: Vec<Candidate>, threshold: f32) -> Vec<Candidate> {
    candidates.retain(|candidate| candidate.confidence > threshold);
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    candidates
}

pub fn select_name(candidates: Vec<Candidate>, threshold: f32) -> Result<String, IdentifyError> {
    if candidates.is_empty() {
        return Err(IdentifyError::EmptyResult);
    }
    filter_candidates(candidates, threshold)
        .first()
        .map(|best| display_name(&best.label))
        .ok_or(IdentifyError::EmptyResult)
}

/// 模型标签常为逗号分隔的同义词列表，如 "tabby cat, tabby"，只取第一个
pub fn display_name(label: &str) -> String {
    let name = label.split(',').next().unwrap_or_default().trim();
    title_case(name)
}

fn title_case(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut word_start = true;
    for c in text.chars() {
        if c.is_whitespace() {
            word_start = true;
            result.push(c);
        } else if word_start {
            word_start = false;
            result.extend(c.to_uppercase());
        } else {
            result.extend(c.to_lowercase());
        }
    }
    result
}
