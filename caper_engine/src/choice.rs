//! Modal conversation-choice dialog.
//!
//! Presents the candidate replies stacked in a centered panel and spins on
//! the input queue until the player picks one by number key or by clicking a
//! highlighted entry. The loop stays cooperative: every idle iteration
//! services the host quit flag and pumps a screen update.

use log::debug;

use crate::context::{InputEvent, Point, Rect, ScriptContext};

/// Palette index used for unselected entries.
const STD_COLOR: u8 = 23;

/// Palette index used for the hovered entry.
const HIGHLIGHT_COLOR: u8 = 103;

/// Vertical gap between stacked entries.
const ENTRY_SPACING: i16 = 5;

/// Bottom anchor for the assembled panel.
const PANEL_BOTTOM: i16 = 180;

/// Horizontal center of the assembled panel.
const PANEL_CENTER_X: i16 = 160;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Choice(usize),
    /// The host asked to quit; no selection was made.
    Quit,
}

#[derive(Debug, Default)]
pub struct ChoicePrompter;

impl ChoicePrompter {
    pub fn new() -> Self {
        ChoicePrompter
    }

    /// Runs the modal loop and returns the selected candidate index.
    pub fn execute(&mut self, ctx: &mut ScriptContext, candidates: &[String]) -> Selection {
        let font = ctx.config.prompt_font;
        let text_left = ctx.config.prompt_text_left;
        let number_left = ctx.config.prompt_number_left;
        let max_width = ctx.config.prompt_max_width;

        // Stack the entries and grow the panel around them.
        let mut entries: Vec<Rect> = Vec::with_capacity(candidates.len());
        let mut panel = Rect::new(40, 0, 40, 0);
        let mut yp = 0;
        for text in candidates {
            let mut rect = ctx.text.measure(text, max_width);
            rect.move_to(Point::new(text_left, yp + 10));
            yp += rect.height() + ENTRY_SPACING;
            panel.extend(rect);
            entries.push(rect);
        }

        // Anchor the panel above the bottom of the screen and center it.
        panel.bottom -= 10;
        panel.translate(0, PANEL_BOTTOM - panel.height());
        panel.set_width(max_width + 15);
        let shift = PANEL_CENTER_X - panel.width() / 2 - panel.left;
        panel.translate(shift, 0);

        ctx.text.open_panel(panel);
        for (idx, text) in candidates.iter().enumerate() {
            let number = format!("{}", idx + 1);
            let mut number_rect = entries[idx];
            number_rect.left = number_left;
            number_rect.set_width(text_left - number_left);
            ctx.text
                .draw_prompt_line(&number, number_rect, font, STD_COLOR);
            ctx.text
                .draw_prompt_line(text, entries[idx], font, STD_COLOR);
        }

        let mut highlighted: Option<usize> = None;
        let selection = loop {
            if ctx.events.quit_requested() {
                debug!("choice prompt aborted by quit request");
                break Selection::Quit;
            }

            let Some(event) = ctx.events.poll() else {
                ctx.events.idle_delay();
                ctx.events.update_screen();
                continue;
            };

            match event {
                InputEvent::Key(key) => {
                    if let Some(digit) = key.to_digit(10) {
                        let digit = digit as usize;
                        if (1..=candidates.len()).contains(&digit) {
                            break Selection::Choice(digit - 1);
                        }
                    }
                }
                InputEvent::ButtonDown(pos) | InputEvent::ButtonUp(pos) => {
                    // Clicks only select while an entry is highlighted.
                    if let Some(idx) = highlighted {
                        break Selection::Choice(idx);
                    }
                    self.refresh_highlight(
                        ctx,
                        candidates,
                        &entries,
                        panel,
                        pos,
                        &mut highlighted,
                    );
                }
                InputEvent::MouseMove(pos) => {
                    self.refresh_highlight(
                        ctx,
                        candidates,
                        &entries,
                        panel,
                        pos,
                        &mut highlighted,
                    );
                }
                InputEvent::Escape | InputEvent::Custom(_) => {}
            }
        };

        ctx.text.close_panel();
        selection
    }

    /// Moves the hover highlight to the entry under the pointer, redrawing
    /// only the entries that changed.
    fn refresh_highlight(
        &self,
        ctx: &mut ScriptContext,
        candidates: &[String],
        entries: &[Rect],
        panel: Rect,
        pointer: Point,
        highlighted: &mut Option<usize>,
    ) {
        let local = Point::new(pointer.x - panel.left, pointer.y - panel.top);
        let over = entries.iter().position(|rect| rect.contains(local));
        if over == *highlighted {
            return;
        }

        let font = ctx.config.prompt_font;
        if let Some(old) = *highlighted {
            ctx.text
                .draw_prompt_line(&candidates[old], entries[old], font, STD_COLOR);
        }
        if let Some(new) = over {
            ctx.text
                .draw_prompt_line(&candidates[new], entries[new], font, HIGHLIGHT_COLOR);
        }
        *highlighted = over;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ScriptContext, TitleConfig};
    use crate::headless::{build_context, Journal, JournalEntry, MemoryResources, ScriptedEvents};

    fn fixture(events: ScriptedEvents) -> (ScriptContext, Journal) {
        build_context(
            TitleConfig::classic(),
            MemoryResources::new(),
            events,
            100,
            0,
        )
    }

    fn candidates() -> Vec<String> {
        vec!["YES".to_string(), "NO".to_string(), "MAYBE".to_string()]
    }

    #[test]
    fn digit_key_selects_directly() {
        let mut events = ScriptedEvents::new();
        events.push(InputEvent::Key('3'));
        let (mut ctx, _journal) = fixture(events);

        let selection = ChoicePrompter::new().execute(&mut ctx, &candidates());
        assert_eq!(selection, Selection::Choice(2));
    }

    #[test]
    fn out_of_range_digit_is_ignored() {
        let mut events = ScriptedEvents::new();
        events.push(InputEvent::Key('9'));
        events.push(InputEvent::Key('0'));
        events.push(InputEvent::Key('2'));
        let (mut ctx, _journal) = fixture(events);

        let selection = ChoicePrompter::new().execute(&mut ctx, &candidates());
        assert_eq!(selection, Selection::Choice(1));
    }

    #[test]
    fn click_selects_only_while_highlighted() {
        // Entry layout under the headless text metrics: entries are stacked
        // at local y 10/25/40, each 10 tall, left edge 25; the panel lands
        // at (20, 140). Local (26, 26) is inside entry 1.
        let hover = Point::new(46, 166);

        let mut events = ScriptedEvents::new();
        events.push(InputEvent::MouseMove(hover));
        events.push(InputEvent::ButtonDown(hover));
        let (mut ctx, journal) = fixture(events);

        let selection = ChoicePrompter::new().execute(&mut ctx, &candidates());
        assert_eq!(selection, Selection::Choice(1));

        // The hover redrew exactly one entry in the highlight color.
        let highlights: Vec<String> = journal
            .borrow()
            .iter()
            .filter_map(|entry| match entry {
                JournalEntry::PromptLine { text, color } if *color == HIGHLIGHT_COLOR => {
                    Some(text.clone())
                }
                _ => None,
            })
            .collect();
        assert_eq!(highlights, vec!["NO".to_string()]);
    }

    #[test]
    fn click_with_nothing_highlighted_selects_nothing() {
        let mut events = ScriptedEvents::new();
        // Far outside every entry; then the queue drains and quit raises.
        events.push(InputEvent::ButtonDown(Point::new(0, 0)));
        let (mut ctx, journal) = fixture(events);

        let selection = ChoicePrompter::new().execute(&mut ctx, &candidates());
        assert_eq!(selection, Selection::Quit);
        assert!(journal
            .borrow()
            .iter()
            .any(|entry| matches!(entry, JournalEntry::PanelClosed)));
    }

    #[test]
    fn hover_moves_restore_the_previous_entry() {
        let over_first = Point::new(46, 151); // local (26, 11) -> entry 0
        let over_second = Point::new(46, 166); // local (26, 26) -> entry 1

        let mut events = ScriptedEvents::new();
        events.push(InputEvent::MouseMove(over_first));
        events.push(InputEvent::MouseMove(over_second));
        events.push(InputEvent::Key('1'));
        let (mut ctx, journal) = fixture(events);

        ChoicePrompter::new().execute(&mut ctx, &candidates());

        // "YES" went highlight -> standard again when the pointer moved on.
        let redraws: Vec<(String, u8)> = journal
            .borrow()
            .iter()
            .filter_map(|entry| match entry {
                JournalEntry::PromptLine { text, color } if text == "YES" || text == "NO" => {
                    Some((text.clone(), *color))
                }
                _ => None,
            })
            .collect();
        let yes_highlight = redraws
            .iter()
            .position(|(text, color)| text == "YES" && *color == HIGHLIGHT_COLOR)
            .expect("first entry highlighted");
        assert!(
            redraws[yes_highlight + 1..]
                .iter()
                .any(|(text, color)| text == "YES" && *color == STD_COLOR),
            "first entry was not restored after the pointer moved on"
        );
        assert!(redraws
            .iter()
            .any(|(text, color)| text == "NO" && *color == HIGHLIGHT_COLOR));
    }

    #[test]
    fn quit_request_aborts_immediately() {
        let mut events = ScriptedEvents::new();
        events.request_quit();
        let (mut ctx, _journal) = fixture(events);

        let selection = ChoicePrompter::new().execute(&mut ctx, &candidates());
        assert_eq!(selection, Selection::Quit);
    }

    #[test]
    fn idle_iterations_keep_servicing_the_screen() {
        let mut events = ScriptedEvents::new();
        events.allow_idle_polls(3);
        let updates = events.update_counter();
        let (mut ctx, _journal) = fixture(events);

        let selection = ChoicePrompter::new().execute(&mut ctx, &candidates());
        assert_eq!(selection, Selection::Quit);
        // One screen update per idle poll before the quit raised.
        assert_eq!(updates.get(), 3);
    }
}
