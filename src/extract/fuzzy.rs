// Edit similarity between short labels, scored as 2 * matches / total length
// where matches come from recursively taking the longest common block.

/// Similarity in `[0, 1]`; identical strings score 1.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_characters(&a, &b) as f64 / total as f64
}

fn matching_characters(a: &[char], b: &[char]) -> usize {
    let (i, j, size) = longest_match(a, b);
    if size == 0 {
        return 0;
    }
    size + matching_characters(&a[..i], &b[..j])
        + matching_characters(&a[i + size..], &b[j + size..])
}

// ties go to the earliest block in `a`, then in `b`
fn longest_match(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        for (j, cb) in b.iter().enumerate() {
            current[j + 1] = if ca == cb { previous[j] + 1 } else { 0 };
            let k = current[j + 1];
            if k > best.2 {
                best = (i + 1 - k, j + 1 - k, k);
            }
        }
        std::mem::swap(&mut previous, &mut current);
    }
    best
}

/// Candidates scoring at least `cutoff`, best first.
pub fn close_matches<'c, I>(word: &str, candidates: I, cutoff: f64) -> Vec<(&'c str, f64)>
where
    I: IntoIterator<Item = &'c str>,
{
    let mut matches: Vec<(&str, f64)> = candidates
        .into_iter()
        .map(|candidate| (candidate, similarity(word, candidate)))
        .filter(|(_, score)| *score >= cutoff)
        .collect();
    matches.sort_by(|x, y| y.1.total_cmp(&x.1).then_with(|| x.0.cmp(y.0)));
    matches
}
