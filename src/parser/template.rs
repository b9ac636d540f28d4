use super::SPAN_RE;

/// A piece of a rendered sentence: literal text, or the gap for the task at
/// `position` (same ordering as [`super::extract_tasks`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Gap { position: usize },
}

/// Split a marked-up sentence into text and gap segments.
pub fn segments(sentence: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut last = 0;

    for (position, m) in SPAN_RE.find_iter(sentence).enumerate() {
        if m.start() > last {
            out.push(Segment::Text(sentence[last..m.start()].to_string()));
        }
        out.push(Segment::Gap { position });
        last = m.end();
    }

    if last < sentence.len() {
        out.push(Segment::Text(sentence[last..].to_string()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::extract_tasks;

    #[test]
    fn gaps_between_text() {
        assert_eq!(
            segments("I <am> a <student>"),
            vec![
                Segment::Text("I ".into()),
                Segment::Gap { position: 0 },
                Segment::Text(" a ".into()),
                Segment::Gap { position: 1 },
            ]
        );
    }

    #[test]
    fn plain_sentence_is_one_text_segment() {
        assert_eq!(
            segments("no markup here"),
            vec![Segment::Text("no markup here".into())]
        );
        assert!(segments("").is_empty());
    }

    #[test]
    fn gap_count_matches_tasks() {
        let s = "<It> <was> raining when <we> left.";
        let gaps = segments(s)
            .iter()
            .filter(|seg| matches!(seg, Segment::Gap { .. }))
            .count();
        assert_eq!(gaps, extract_tasks(s).count());
    }
}
