//! "Did you mean" suggestions via Levenshtein distance.

use strsim::levenshtein;

/// Largest edit distance still worth suggesting.
const MAX_DISTANCE: usize = 2;

/// Suggest the closest candidate to `input`.
/// Returns `None` unless some candidate is within distance 2.
pub fn suggest_similar<'a, I>(input: &str, candidates: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    if input.is_empty() {
        return None;
    }
    let input_lower = input.to_lowercase();
    let mut best_match: Option<(&str, usize)> = None;

    for candidate in candidates {
        let distance = levenshtein(&input_lower, &candidate.to_lowercase());
        if distance > MAX_DISTANCE {
            continue;
        }
        match best_match {
            Some((_, best)) if distance >= best => {}
            _ => best_match = Some((candidate, distance)),
        }
    }

    best_match.map(|(candidate, _)| candidate.to_string())
}
