use crate::protocol::{ Command, ScreenStatus, TextPage };

/// Text layout limits of the glasses display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayGeometry {
    /// Usable text width in pixels.
    pub max_width: usize,
    pub font_size: usize,
    pub lines_per_screen: usize,
}

impl Default for DisplayGeometry {
    fn default() -> Self {
        Self { max_width: 488, font_size: 21, lines_per_screen: 5 }
    }
}

impl DisplayGeometry {
    /// Estimated rendered width: half an em per character.
    #[inline]
    pub fn estimated_width(&self, line: &str) -> usize {
        (line.chars().count() * self.font_size) / 2
    }

    fn fits(&self, line: &str) -> bool {
        self.estimated_width(line) <= self.max_width
    }
}

/// Greedily pack whitespace-separated words into lines.
///
/// A word wider than the display still gets a line of its own. No empty
/// lines are produced.
pub fn split_into_lines(text: &str, geometry: &DisplayGeometry) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }
        let candidate_len = current.chars().count() + 1 + word.chars().count();
        if (candidate_len * geometry.font_size) / 2 <= geometry.max_width {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }

    debug_assert!(lines.iter().all(|l| !l.is_empty()));
    lines
}

/// Group lines into screens of `lines_per_screen`; the last may be shorter.
pub fn group_into_screens(lines: Vec<String>, lines_per_screen: usize) -> Vec<Vec<String>> {
    let per = lines_per_screen.max(1);
    let mut screens = Vec::with_capacity(lines.len().div_ceil(per));
    let mut iter = lines.into_iter().peekable();
    while iter.peek().is_some() {
        screens.push(iter.by_ref().take(per).collect());
    }
    screens
}

/// Lines grouped into screens for `text`.
pub fn paginate(text: &str, geometry: &DisplayGeometry) -> Vec<Vec<String>> {
    group_into_screens(split_into_lines(text, geometry), geometry.lines_per_screen)
}

/// Inverse of [`paginate`] up to whitespace: joins every line with a space.
pub fn join_screens(screens: &[Vec<String>]) -> String {
    screens
        .iter()
        .flatten()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

/// One text-page command per screen, lines joined with `\n`.
pub fn screen_commands(screens: &[Vec<String>], status: ScreenStatus) -> Vec<Command> {
    let total = screens.len();
    screens
        .iter()
        .enumerate()
        .map(|(i, lines)| {
            Command::Text(TextPage {
                status,
                page: (i & 0xff) as u8,
                max_page: (total & 0xff) as u8,
                text: lines.join("\n"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn words(n: usize) -> String {
        (1..=n)
            .map(|i| format!("word{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_line_width_limit() {
        let g = DisplayGeometry::default();
        // 46 chars * 21 / 2 = 483 fits, 47 chars = 493 does not.
        for line in split_into_lines(&words(50), &g) {
            assert!(g.fits(&line), "line too wide: {line:?}");
        }
    }

    #[test]
    fn test_word50_geometry() {
        let g = DisplayGeometry::default();
        let lines = split_into_lines(&words(50), &g);
        assert_eq!(lines.len(), 8);
        assert_eq!(lines[0], "word1 word2 word3 word4 word5 word6 word7");
        let screens = group_into_screens(lines, g.lines_per_screen);
        assert_eq!(screens.len(), 2);
        assert_eq!(screens[1].len(), 3);
    }

    #[test]
    fn test_twelve_lines_make_three_screens() {
        let g = DisplayGeometry::default();
        let lines = split_into_lines(&words(74), &g);
        assert_eq!(lines.len(), 12);
        let screens = paginate(&words(74), &g);
        assert_eq!(screens.len(), 3);
        assert_eq!(screens[2].len(), 2);
    }

    #[test]
    fn test_oversized_word_gets_own_line() {
        let g = DisplayGeometry { max_width: 40, font_size: 10, lines_per_screen: 5 };
        let lines = split_into_lines("a verylongword b", &g);
        assert_eq!(lines, vec!["a", "verylongword", "b"]);
    }

    #[test]
    fn test_blank_text_has_no_screens() {
        assert!(paginate("   \n\t ", &DisplayGeometry::default()).is_empty());
    }

    #[test]
    fn test_screen_commands_number_pages() {
        let screens = vec![vec!["a".to_string(), "b".to_string()], vec!["c".to_string()]];
        let cmds = screen_commands(&screens, ScreenStatus::default());
        assert_eq!(cmds.len(), 2);
        let first = cmds[0].encode();
        assert_eq!(&first[7..9], &[0, 2]);
        assert_eq!(&first[9..], b"a\nb");
        let second = cmds[1].encode();
        assert_eq!(&second[7..9], &[1, 2]);
    }

    proptest! {
        #[test]
        fn prop_repagination_is_stable(
            ws in proptest::collection::vec("[a-z]{1,30}", 0..120),
            width in 60usize..600,
            font in 8usize..32,
            per in 1usize..8
        ) {
            let g = DisplayGeometry { max_width: width, font_size: font, lines_per_screen: per };
            let text = ws.join(" ");
            let once = paginate(&text, &g);
            let twice = paginate(&join_screens(&once), &g);
            prop_assert_eq!(&once, &twice);
            for screen in &once {
                prop_assert!(!screen.is_empty() && screen.len() <= per);
            }
        }
    }
}
