//! Tag-stream parser for reasoning traces.
//!
//! Model output follows a small tag vocabulary: `<step>` bodies paired
//! positionally with `<count>` remainders, `<reflection>` bodies scored
//! by the `<reward>` that follows them, and a single `<answer>` /
//! `<final_reward>` pair. Models drift, so the parser is tolerant by
//! construction: unclosed tags end at the next known tag, malformed
//! numbers normalize to zero, and an empty response parses to an empty
//! trace rather than an error.

use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use crate::task::{Interaction, Reflection, Step};

/// Tags the scanner recognizes as span boundaries.
const OPENERS: &[&str] = &[
    "<thinking>",
    "<step>",
    "<count>",
    "<reflection>",
    "<reward>",
    "<answer>",
    "<final_reward>",
];

#[derive(Debug)]
struct TagSpan {
    start: usize,
    end: usize,
    body: String,
}

/// All bodies of `<tag>…</tag>`, tolerating a missing close: an
/// unclosed body runs to the next known tag or the end of input.
fn tag_spans(text: &str, tag: &str) -> Vec<TagSpan> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut spans = Vec::new();
    let mut from = 0;

    while let Some(rel) = text[from..].find(&open) {
        let start = from + rel;
        let body_start = start + open.len();
        let close_pos = text[body_start..].find(&close).map(|p| body_start + p);
        let next_open = OPENERS
            .iter()
            .filter_map(|o| text[body_start..].find(o).map(|p| body_start + p))
            .min();
        let end = match (close_pos, next_open) {
            (Some(c), Some(n)) if n < c => n,
            (Some(c), _) => c,
            (None, Some(n)) => n,
            (None, None) => text.len(),
        };
        spans.push(TagSpan {
            start,
            end,
            body: text[body_start..end].trim().to_string(),
        });
        from = end.max(body_start);
    }
    spans
}

fn reward_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(0\.\d+|1\.0)").expect("static regex"))
}

/// Normalize a reward literal. Only `0.x` and `1.0` forms count;
/// everything else (missing, negative, out of range, garbage) is 0.0.
pub fn normalize_reward(text: &str) -> f64 {
    reward_regex()
        .find(text)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|v| v.min(1.0))
        .unwrap_or(0.0)
}

/// Extract a standalone `<reflection>`/`<reward>` pair, for responses
/// to an explicit reflection request. Falls back to a placeholder
/// critique and a zero reward.
pub fn parse_reflection(text: &str) -> (String, f64) {
    let content = tag_spans(text, "reflection")
        .first()
        .map(|s| s.body.clone())
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| "No reflection provided.".to_string());
    let reward = tag_spans(text, "reward")
        .first()
        .map(|s| normalize_reward(&s.body))
        .unwrap_or(0.0);
    (content, reward)
}

/// Parse one model response into an [`Interaction`], reconciling it
/// against the steps and reflections accumulated in earlier turns.
///
/// `initial_budget` anchors step numbering: a step that reports
/// `<count>N</count>` is step `initial_budget - N`.
pub fn parse_response(
    response: &str,
    initial_budget: i64,
    existing_steps: &[Step],
    existing_reflections: &[Reflection],
) -> Interaction {
    if response.trim().is_empty() {
        return Interaction::default();
    }

    let step_spans = tag_spans(response, "step");
    let count_spans = tag_spans(response, "count");
    let reflection_spans = tag_spans(response, "reflection");
    let reward_spans = tag_spans(response, "reward");
    let answer = tag_spans(response, "answer")
        .first()
        .map(|s| s.body.clone())
        .unwrap_or_default();
    let final_reward = tag_spans(response, "final_reward")
        .first()
        .map(|s| normalize_reward(&s.body))
        .unwrap_or(0.0);

    // Steps pair with counts positionally; a step past the last count
    // continues the countdown from its predecessor.
    let mut steps: Vec<Step> = Vec::new();
    let mut remaining = initial_budget;
    for (i, span) in step_spans.iter().enumerate() {
        remaining = match count_spans.get(i) {
            Some(count) => count.body.parse::<i64>().unwrap_or(0),
            None => remaining - 1,
        };
        steps.push(Step {
            description: span.body.clone(),
            step_number: initial_budget - remaining,
            remaining_budget: remaining,
            reflection: None,
        });
    }

    // A reflection scores the step it follows; its reward is the first
    // one between its close and the next reflection or step.
    let mut reflections: Vec<Reflection> = Vec::new();
    for (i, span) in reflection_spans.iter().enumerate() {
        let boundary = reflection_spans
            .get(i + 1)
            .map(|s| s.start)
            .into_iter()
            .chain(
                step_spans
                    .iter()
                    .map(|s| s.start)
                    .filter(|&start| start > span.end),
            )
            .min()
            .unwrap_or(response.len());
        let reward = reward_spans
            .iter()
            .find(|r| r.start > span.end && r.start < boundary)
            .map(|r| normalize_reward(&r.body))
            .unwrap_or(0.0);
        let step_number = step_spans
            .iter()
            .zip(steps.iter())
            .filter(|(tag, _)| tag.start < span.start)
            .map(|(_, step)| step.step_number)
            .last()
            .unwrap_or((i + 1) as i64);
        reflections.push(Reflection {
            content: span.body.clone(),
            reward,
            step_number,
        });
    }

    // Attach each reflection to its step.
    for reflection in &reflections {
        if let Some(step) = steps
            .iter_mut()
            .find(|s| s.step_number == reflection.step_number)
        {
            step.reflection = Some(reflection.clone());
        }
    }

    let (steps, reflections) =
        reconcile(steps, reflections, existing_steps, existing_reflections);

    debug!(
        steps = steps.len(),
        reflections = reflections.len(),
        has_answer = !answer.is_empty(),
        final_reward,
        "parsed response"
    );

    Interaction {
        steps,
        reflections,
        answer,
        final_reward,
    }
}

/// Merge parsed steps/reflections with earlier turns: prior steps are
/// reinserted at their positions, and a parsed step that matches an
/// existing one (by number, or case-insensitive text) updates it rather
/// than duplicating it.
fn reconcile(
    parsed_steps: Vec<Step>,
    parsed_reflections: Vec<Reflection>,
    existing_steps: &[Step],
    existing_reflections: &[Reflection],
) -> (Vec<Step>, Vec<Reflection>) {
    if existing_steps.is_empty() && existing_reflections.is_empty() {
        return (parsed_steps, parsed_reflections);
    }

    let mut steps: Vec<Step> = existing_steps.to_vec();
    for parsed in parsed_steps {
        let matched = steps.iter_mut().find(|s| {
            s.step_number == parsed.step_number
                || s.description.eq_ignore_ascii_case(&parsed.description)
        });
        match matched {
            Some(existing) => {
                if parsed.reflection.is_some() {
                    existing.reflection = parsed.reflection;
                }
            }
            None => steps.push(parsed),
        }
    }
    steps.sort_by_key(|s| s.step_number);

    let mut reflections: Vec<Reflection> = existing_reflections.to_vec();
    for parsed in parsed_reflections {
        if !reflections
            .iter()
            .any(|r| r.step_number == parsed.step_number)
        {
            reflections.push(parsed);
        }
    }
    reflections.sort_by_key(|r| r.step_number);

    (steps, reflections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reward_normalization_boundaries() {
        assert_eq!(normalize_reward("0.85"), 0.85);
        assert_eq!(normalize_reward("1.0"), 1.0);
        assert_eq!(normalize_reward("reward is 0.3 overall"), 0.3);
        assert_eq!(normalize_reward("2.0"), 0.0);
        assert_eq!(normalize_reward("-1"), 0.0);
        assert_eq!(normalize_reward("abc"), 0.0);
        assert_eq!(normalize_reward(""), 0.0);
    }

    #[test]
    fn standalone_reflection_parses_with_defaults() {
        let (content, reward) =
            parse_reflection("<reflection>tight logic</reflection><reward>0.8</reward>");
        assert_eq!(content, "tight logic");
        assert_eq!(reward, 0.8);

        let (content, reward) = parse_reflection("no tags at all");
        assert_eq!(content, "No reflection provided.");
        assert_eq!(reward, 0.0);
    }

    #[test]
    fn empty_response_parses_to_empty_interaction() {
        let parsed = parse_response("", 20, &[], &[]);
        assert!(parsed.is_empty());
        assert_eq!(parsed.final_reward, 0.0);

        let tagless = parse_response("just prose, no protocol", 20, &[], &[]);
        assert!(tagless.steps.is_empty());
        assert_eq!(tagless.answer, "");
    }

    #[test]
    fn full_trace_parses_steps_reflections_and_answer() {
        let response = "<thinking>Let me work through this.</thinking>\n\
            <step>Identify the knowns.</step><count>19</count>\n\
            <reflection>Solid start.</reflection><reward>0.9</reward>\n\
            <step>Set up the equation.</step><count>18</count>\n\
            <reflection>One sign is shaky.</reflection><reward>0.6</reward>\n\
            <step>Solve for x.</step><count>17</count>\n\
            <answer>x = 4</answer>\n\
            <final_reward>0.85</final_reward>";
        let parsed = parse_response(response, 20, &[], &[]);

        assert_eq!(parsed.steps.len(), 3);
        assert_eq!(parsed.steps[0].step_number, 1);
        assert_eq!(parsed.steps[0].remaining_budget, 19);
        assert_eq!(parsed.steps[2].step_number, 3);
        assert_eq!(parsed.reflections.len(), 2);
        assert_eq!(parsed.reflections[0].reward, 0.9);
        assert_eq!(parsed.reflections[0].step_number, 1);
        assert_eq!(parsed.reflections[1].reward, 0.6);
        assert_eq!(parsed.answer, "x = 4");
        assert_eq!(parsed.final_reward, 0.85);
        assert_eq!(
            parsed.steps[0].reflection.as_ref().unwrap().content,
            "Solid start."
        );
        assert!(parsed.steps[2].reflection.is_none());
    }

    #[test]
    fn unclosed_step_ends_at_next_tag() {
        let response = "<step>First step without close\n\
            <step>Second step</step><count>18</count>";
        let parsed = parse_response(response, 20, &[], &[]);
        assert_eq!(parsed.steps.len(), 2);
        assert_eq!(parsed.steps[0].description, "First step without close");
        // First count pairs with the first step.
        assert_eq!(parsed.steps[0].remaining_budget, 18);
        // Second step continues the countdown.
        assert_eq!(parsed.steps[1].remaining_budget, 17);
    }

    #[test]
    fn missing_counts_continue_countdown() {
        let response = "<step>a</step>\n<step>b</step>\n<step>c</step>";
        let parsed = parse_response(response, 10, &[], &[]);
        let budgets: Vec<i64> = parsed.steps.iter().map(|s| s.remaining_budget).collect();
        assert_eq!(budgets, vec![9, 8, 7]);
        let numbers: Vec<i64> = parsed.steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn malformed_count_normalizes_to_zero() {
        let response = "<step>a</step><count>lots</count>";
        let parsed = parse_response(response, 20, &[], &[]);
        assert_eq!(parsed.steps[0].remaining_budget, 0);
        assert_eq!(parsed.steps[0].step_number, 20);
    }

    #[test]
    fn reward_belongs_to_the_closest_preceding_reflection() {
        let response = "<reflection>first</reflection>\n\
            <reflection>second</reflection><reward>0.7</reward>";
        let parsed = parse_response(response, 20, &[], &[]);
        assert_eq!(parsed.reflections.len(), 2);
        // The reward sits past the first reflection's boundary.
        assert_eq!(parsed.reflections[0].reward, 0.0);
        assert_eq!(parsed.reflections[1].reward, 0.7);
    }

    #[test]
    fn first_answer_and_final_reward_win() {
        let response = "<answer>first</answer><final_reward>0.9</final_reward>\n\
            <answer>second</answer><final_reward>0.1</final_reward>";
        let parsed = parse_response(response, 20, &[], &[]);
        assert_eq!(parsed.answer, "first");
        assert_eq!(parsed.final_reward, 0.9);
    }

    #[test]
    fn duplicate_step_text_with_distinct_counts_stays_distinct() {
        let response = "<step>verify</step><count>19</count>\
            <step>verify</step><count>18</count>";
        let parsed = parse_response(response, 20, &[], &[]);
        assert_eq!(parsed.steps.len(), 2);
        assert_ne!(parsed.steps[0].step_number, parsed.steps[1].step_number);
    }

    #[test]
    fn prior_steps_are_reinserted() {
        let existing = vec![
            Step {
                description: "earlier work".to_string(),
                step_number: 1,
                remaining_budget: 19,
                reflection: None,
            },
            Step {
                description: "more earlier work".to_string(),
                step_number: 2,
                remaining_budget: 18,
                reflection: None,
            },
        ];
        let response = "<step>fresh step</step><count>17</count>";
        let parsed = parse_response(response, 20, &existing, &[]);
        assert_eq!(parsed.steps.len(), 3);
        assert_eq!(parsed.steps[0].description, "earlier work");
        assert_eq!(parsed.steps[2].description, "fresh step");
        assert_eq!(parsed.steps[2].step_number, 3);
    }

    #[test]
    fn matching_step_updates_instead_of_duplicating() {
        let existing = vec![Step {
            description: "Check the inputs".to_string(),
            step_number: 1,
            remaining_budget: 19,
            reflection: None,
        }];
        let response = "<step>check the INPUTS</step><count>19</count>\
            <reflection>thorough</reflection><reward>0.8</reward>";
        let parsed = parse_response(response, 20, &existing, &[]);
        assert_eq!(parsed.steps.len(), 1);
        assert_eq!(parsed.steps[0].description, "Check the inputs");
        assert_eq!(parsed.steps[0].reflection.as_ref().unwrap().reward, 0.8);
    }

    #[test]
    fn existing_reflections_take_precedence() {
        let existing = vec![Reflection {
            content: "kept".to_string(),
            reward: 0.4,
            step_number: 1,
        }];
        let response = "<step>a</step><count>19</count>\
            <reflection>replacement</reflection><reward>0.9</reward>";
        let parsed = parse_response(response, 20, &[], &existing);
        assert_eq!(parsed.reflections.len(), 1);
        assert_eq!(parsed.reflections[0].content, "kept");
    }
}
