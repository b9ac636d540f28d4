use super::SPAN_RE;

/// Lazy iterator over the answers hidden in a marked-up sentence.
///
/// Cloning restarts nothing and shares nothing: each clone walks the
/// sentence independently from where it was cloned.
#[derive(Debug, Clone)]
pub struct Tasks<'a> {
    sentence: &'a str,
    offset: usize,
}

/// Yield the inner text of every `<...>` span in `sentence`, left to right.
pub fn extract_tasks(sentence: &str) -> Tasks<'_> {
    Tasks {
        sentence,
        offset: 0,
    }
}

impl<'a> Iterator for Tasks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.offset > self.sentence.len() {
            return None;
        }
        let m = SPAN_RE.find_at(self.sentence, self.offset)?;
        self.offset = m.end();
        let span = m.as_str();
        Some(&span[1..span.len() - 1])
    }
}

impl std::iter::FusedIterator for Tasks<'_> {}
