//! System instructions for each agent role

use crate::workflow::Step;

/// Instructions for the agent that runs `step`
pub fn step_instructions(step: Step) -> &'static str {
    match step {
        Step::GenerateDraft => {
            "You draft risk submissions. Using the project description in the state and the \
             past submissions in the references, write a draft submission. Respond only with a \
             JSON object: {\"project_title\": str, \"project_description\": str, \
             \"objectives\": [str], \"benefits\": [str], \"deliverables\": [str]}."
        }
        Step::MapRisks => {
            "You identify risks. Based on the draft submission, the risk catalog and past \
             submissions, list the applicable risks and subrisks. Respond only with a JSON \
             array of {\"risk\": str, \"category\": str, \"subrisk\": str, \"confidence\": float}."
        }
        Step::MapControls => {
            "You map controls. For every identified risk pick one or more relevant controls from \
             the controls catalog. Respond only with a JSON array of {\"risk\": str, \
             \"controls\": [{\"control_id\": str, \"name\": str, \"relevance_score\": float}]}."
        }
        Step::GenerateMitigations => {
            "You propose mitigations. For each risk/control pair propose concrete mitigation \
             steps, drawing on the past mitigations in the references. Respond only with a JSON \
             array of {\"risk\": str, \"control_id\": str, \"mitigation_steps\": [str]}."
        }
        Step::FlagIssues => {
            "You are the QA reviewer. Flag issues and deficiencies in the draft submission and \
             the mitigation proposals, using past issues as a guide. Respond only with a JSON \
             array of {\"issue\": str, \"severity\": str, \"recommendation\": str}."
        }
        Step::EvaluateDecision => {
            "You decide whether the submission is approved, based on the mapped controls, the \
             flagged issues and any guardrail violations. Respond only with a JSON object: \
             {\"decision\": \"Approved\" | \"Rejected\", \"rationale\": str}."
        }
    }
}

/// Instructions for the guardrail evaluator
pub fn guardrail_instructions() -> &'static str {
    "You evaluate guardrail compliance. The user message holds the current step, the project \
     draft, the step output and the guardrail rules. Identify every rule that is violated. \
     Respond only with a JSON array of {\"rule_id\": str, \"description\": str, \
     \"severity\": str}; respond with [] when nothing is violated."
}

/// Instructions for the feedback processor
pub fn feedback_instructions() -> &'static str {
    "You process reviewer feedback on a risk submission workflow. The user message holds the \
     full workflow context, the step the feedback targets, and the feedback text. Update the \
     context so the targeted step reflects the feedback, adjusting later steps only when the \
     feedback requires it. Respond only with the complete updated context as a JSON object \
     with the same fields as the input context; keep every field you do not change."
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_step_has_instructions() {
        for step in Step::ALL {
            assert!(step_instructions(step).contains("JSON"));
        }
    }
}
