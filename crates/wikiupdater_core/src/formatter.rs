//! Whitespace normalization for whole pages.
//!
//! Lines inside `{{Codebox` .. `==See also==` regions and infobox bodies are
//! left as they are; everything else gets trailing whitespace stripped and
//! blank lines arranged around headings and navboxes.

pub const FORMAT_LABEL: &str = "Format wiki text";

pub fn format_wiki_text(text: &str) -> String {
    let mut lines = text.split('\n').map(str::to_string).collect::<Vec<_>>();
    let mut changed = false;
    let mut in_codebox = false;
    let mut index = 0;

    while index < lines.len() {
        let line = lines[index].clone();
        if line.starts_with("{{Codebox") {
            in_codebox = true;
        }
        if in_codebox && line.starts_with("==See also==") {
            in_codebox = false;
        }
        if in_codebox {
            index += 1;
            continue;
        }

        let stripped = line.trim_end();
        if stripped.len() != line.len() {
            lines[index] = stripped.to_string();
            changed = true;
        }

        if line.starts_with("{{Infobox") {
            match (index + 1..lines.len()).find(|&close| lines[close].starts_with("}}")) {
                Some(close) => {
                    changed |= remove_blank_run(&mut lines, close + 1);
                    index = close + 1;
                }
                None => index = lines.len(),
            }
            continue;
        }

        if is_heading(&line, 2) {
            if index > 0 && !is_blank(&lines[index - 1]) {
                lines.insert(index, String::new());
                changed = true;
                index += 1;
            }
            changed |= remove_blank_run(&mut lines, index + 1);
        }

        if is_heading(&line, 3) && index > 0 {
            let previous = lines[index - 1].trim();
            if !previous.is_empty() && !previous.starts_with("==") {
                lines.insert(index, String::new());
                changed = true;
                index += 1;
            }
        }

        if line.starts_with("{{Navbox") && index + 1 < lines.len() && !is_blank(&lines[index + 1])
        {
            lines.insert(index + 1, String::new());
            changed = true;
        }

        index += 1;
    }

    let mut collapsed = Vec::with_capacity(lines.len());
    let mut previous_blank = false;
    for line in lines {
        let blank = is_blank(&line);
        if blank && previous_blank {
            changed = true;
            continue;
        }
        previous_blank = blank;
        collapsed.push(line);
    }

    if changed {
        collapsed.join("\n")
    } else {
        text.to_string()
    }
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// `==` heading of exactly `level` equals signs at the line start.
fn is_heading(line: &str, level: usize) -> bool {
    let depth = line.chars().take_while(|&character| character == '=').count();
    depth >= level && line[level..].chars().next() != Some('=')
}

/// Drop the run of blank lines starting at `start`; true when any were removed.
fn remove_blank_run(lines: &mut Vec<String>, start: usize) -> bool {
    if start >= lines.len() {
        return false;
    }
    let end = lines[start..]
        .iter()
        .position(|line| !is_blank(line))
        .map_or(lines.len(), |offset| start + offset);
    lines.drain(start..end);
    end > start
}

#[cfg(test)]
mod tests {
    use super::format_wiki_text;

    #[test]
    fn headings_get_one_blank_line_before_and_none_after() {
        assert_eq!(
            format_wiki_text("Intro  \n==Usage==\n\n\nText"),
            "Intro\n\n==Usage==\nText"
        );
    }

    #[test]
    fn subheadings_after_headings_stay_tight() {
        assert_eq!(
            format_wiki_text("==A==\n===B===\ntext\n===C===\nmore"),
            "==A==\n===B===\ntext\n\n===C===\nmore"
        );
    }

    #[test]
    fn infobox_bodies_are_untouched_and_trailing_blanks_dropped() {
        assert_eq!(
            format_wiki_text("{{Infobox item\n|a=1  \n}}\n\n\nBody"),
            "{{Infobox item\n|a=1  \n}}\nBody"
        );
    }

    #[test]
    fn codebox_regions_are_skipped_until_see_also() {
        assert_eq!(
            format_wiki_text("{{Codebox\nx  \n==See also==\ny  "),
            "{{Codebox\nx  \n\n==See also==\ny"
        );
    }

    #[test]
    fn navbox_is_followed_by_blank_line() {
        assert_eq!(
            format_wiki_text("{{Navbox items}}\n[[Category:Tools]]"),
            "{{Navbox items}}\n\n[[Category:Tools]]"
        );
    }

    #[test]
    fn blank_runs_collapse() {
        assert_eq!(format_wiki_text("a\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn clean_text_is_returned_verbatim() {
        let text = "Clean\n\n==Heading==\nText\n";
        assert_eq!(format_wiki_text(text), text);
    }
}
