//! Prompt assembly for the reasoning protocol.
//!
//! Everything the model sees lives here: the system prompt with its
//! worked example, the per-iteration focus block, the continuation
//! suffix that steers the model back into the tag vocabulary, and the
//! persona table for collaborative runs.

use crate::complexity::plan::{Plan, PlanStep, Subtask};
use crate::task::{Interaction, Task};

/// Wrapper tag for a persona's turn; generation stops at its close.
pub const PERSONA_CLOSE_TAG: &str = "</persona_response>";

/// A collaborating persona: a reasoning style plus the sampling
/// temperature that suits it.
#[derive(Debug, Clone, Copy)]
pub struct Persona {
    pub name: &'static str,
    pub personality: &'static str,
    pub temperature: f64,
    pub intro: &'static str,
}

/// Fixed roster; `agents = K` draws the first K entries in order.
pub const PERSONAS: [Persona; 10] = [
    Persona {
        name: "Scout",
        personality: "explorative",
        temperature: 0.7,
        intro: "You explore the widest space of approaches before committing, \
                surfacing options the others have not considered.",
    },
    Persona {
        name: "Auditor",
        personality: "skeptic",
        temperature: 0.2,
        intro: "You distrust every claim until it is checked, hunting for the \
                flaw in the current line of reasoning.",
    },
    Persona {
        name: "Clerk",
        personality: "systematic",
        temperature: 0.0,
        intro: "You proceed strictly in order, never skipping a step and never \
                leaving a case unhandled.",
    },
    Persona {
        name: "Architect",
        personality: "structured",
        temperature: 0.2,
        intro: "You organize the problem into clean parts with explicit \
                interfaces before working on any one of them.",
    },
    Persona {
        name: "Muse",
        personality: "creative",
        temperature: 0.7,
        intro: "You look for the reframing that makes the problem easy, even \
                when it means discarding the obvious route.",
    },
    Persona {
        name: "Geometer",
        personality: "mathematical",
        temperature: 0.0,
        intro: "You reduce the problem to formal statements and manipulate \
                them with full rigor.",
    },
    Persona {
        name: "Surveyor",
        personality: "exploratory",
        temperature: 0.7,
        intro: "You probe the boundaries of the problem, testing edge cases \
                and hidden assumptions.",
    },
    Persona {
        name: "Engineer",
        personality: "engineering",
        temperature: 0.0,
        intro: "You want something that works end to end first, then you \
                harden it.",
    },
    Persona {
        name: "Reviewer",
        personality: "engineering",
        temperature: 0.2,
        intro: "You read the work so far the way a careful reviewer would, \
                flagging what will break in production.",
    },
    Persona {
        name: "Dreamer",
        personality: "creative",
        temperature: 0.9,
        intro: "You chase the unlikely idea that, if it lands, beats every \
                conventional answer.",
    },
];

impl Persona {
    /// Transcript suffix that opens this persona's turn.
    pub fn opening(&self) -> String {
        format!(
            "\n<persona_response name=\"{}\" style=\"{}\">\n",
            self.name, self.personality
        )
    }
}

const EXAMPLE_TRACE: &str = "<thinking>I need the train's average speed: distance \
over time.</thinking>\n\
<step>Extract the given values: 240 km traveled in 3 hours.</step>\n\
<count>19</count>\n\
<reflection>The values are stated directly in the problem; nothing to \
question.</reflection>\n\
<reward>0.9</reward>\n\
<step>Divide distance by time: 240 / 3 = 80.</step>\n\
<count>18</count>\n\
<reflection>Arithmetic is simple and checks out.</reflection>\n\
<reward>1.0</reward>\n\
<answer>The average speed is 80 km/h.</answer>\n\
<final_reward>0.95</final_reward>";

/// The system prompt: protocol rules, the step budget, the expected
/// artifact, and one worked example.
pub fn system_prompt(task: &Task, adjusted_budget: u32) -> String {
    format!(
        "You are a careful reasoner that thinks in explicit, budgeted steps.\n\
         \n\
         Follow this protocol exactly:\n\
         - Think inside <thinking> tags.\n\
         - Put each reasoning step inside <step> tags, and after every step \
         emit <count>N</count> with your remaining step budget.\n\
         - After important steps, evaluate your own work inside <reflection> \
         tags and score it with <reward>F</reward>, where F is between 0.0 \
         and 1.0 (use forms like 0.7 or 1.0).\n\
         - When you are done, give the result inside <answer> tags and score \
         the whole solution with <final_reward>F</final_reward>.\n\
         \n\
         You have a {adjusted_budget}-step budget. Stop stepping when it \
         reaches zero. The answer should be {kind} content (.{ext}).\n\
         \n\
         Example:\n{EXAMPLE_TRACE}",
        kind = task.output_kind.as_str(),
        ext = task.file_extension,
    )
}

/// The opening user message.
pub fn user_prompt(task: &Task) -> String {
    format!("Task:\n{}", task.effective_description())
}

/// Suffix appended to every continuation so the next token lands back
/// inside the protocol.
pub fn continuation_suffix(remaining: i64) -> String {
    format!("<count>{remaining}</count>\n<thinking>")
}

fn unit_fields(
    number: i64,
    name: &str,
    description: &str,
    explanation: &str,
    output: &str,
    full_text: &str,
) -> String {
    format!(
        "Number: {number}\nName: {name}\nDescription: {description}\n\
         Explanation: {explanation}\nExpected output: {output}\n\
         Source text: {full_text}"
    )
}

/// Per-iteration focus block: the condensed plan plus everything known
/// about the unit of work the model should be advancing right now.
pub fn focus_block(plan: &Plan, step: &PlanStep, subtask: Option<&Subtask>) -> String {
    let mut block = plan.condensed();
    block.push_str("\nCurrent step:\n");
    block.push_str(&unit_fields(
        step.number,
        &step.name,
        &step.description,
        &step.explanation,
        &step.output,
        &step.full_text,
    ));
    if let Some(subtask) = subtask {
        block.push_str("\n\nCurrent subtask:\n");
        block.push_str(&unit_fields(
            subtask.number,
            &subtask.name,
            &subtask.description,
            &subtask.explanation,
            &subtask.output,
            &subtask.full_text,
        ));
    }
    block.push('\n');
    block
}

/// Rebuild the user prompt for a refinement pass, splicing in every
/// reflection that scored below the bar as explicit guidance.
pub fn refined_prompt(task: &Task, interaction: &Interaction, new_budget: u32) -> String {
    let mut prompt = format!(
        "{}\n\nA previous attempt did not reach a confident answer. You have a \
         fresh {new_budget}-step budget. Take these self-criticisms from the \
         earlier attempt into account:\n",
        user_prompt(task)
    );
    for reflection in interaction.weak_reflections(0.5) {
        prompt.push_str(&format!(
            "<thinking>Reflection: {}</thinking>\n",
            reflection.content
        ));
    }
    prompt
}

/// Request a missing reflection for the most recent step.
pub fn reflection_request(step_description: &str) -> String {
    format!(
        "Evaluate the following reasoning step. Respond with a <reflection> \
         tag containing a short critique and a <reward> tag scoring it \
         between 0.0 and 1.0.\n\nStep:\n{step_description}"
    )
}
