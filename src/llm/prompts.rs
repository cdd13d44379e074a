//! LLM prompts for sheet extraction, exam answering and grading.
//!
//! Templates use `{name}` placeholders that callers fill with [`Prompts::fill`].

/// Collection of prompts used across the pipeline.
pub struct Prompts;

impl Prompts {
    /// Substitute `{name}` placeholders in one pass.
    ///
    /// Inserted values are never scanned again, so a value containing
    /// `{solution}` stays literal. Unknown placeholders are left as is.
    pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after_brace = &rest[start + 1..];
            let hit = values.iter().find_map(|(name, value)| {
                after_brace
                    .strip_prefix(name)?
                    .strip_prefix('}')
                    .map(|after| (*value, after))
            });

            match hit {
                Some((value, after)) => {
                    out.push_str(value);
                    rest = after;
                }
                None => {
                    out.push('{');
                    rest = after_brace;
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// System prompt for turning an exam PDF into an answer sheet.
    pub fn answer_sheet_system() -> &'static str {
        r#"You are extracting questions from an exam PDF to create a self-contained answer sheet.

YOUR TASK:
Extract ALL questions from the provided exam PDF and create a self-contained answer sheet in JSON format.
The answer sheet must be COMPLETE - no external PDFs will be provided to candidates.

=========== QUESTION STRUCTURE ===========

Each question must have:
- question_id: unique identifier (e.g., "1", "2", "3a", "3b")
- question_text: VERBATIM text from the PDF including all relevant context, the question itself,
  answer format instructions and, for multiple choice, ALL available options
- answer_field: "" (empty string for all answerable questions)
- subquestions: (optional) array for grouped/nested questions

=========== HIERARCHICAL QUESTIONS ===========

For tables or multi-part questions use a parent question that holds the shared context,
instructions and (for multiple choice tables) the options. The parent has NO answer_field.
Its subquestions ("2a", "2b", ...) hold the specific item text and answer_field: "".

=========== EXAMPLES ===========

SIMPLE MULTIPLE CHOICE:
{
  "question_id": "2",
  "question_text": "Which statement is correct?\n\na) First option\nb) Second option\nc) Third option\n\nProvide the letter of the correct answer.",
  "answer_field": ""
}

GROUPED MC TABLE:
{
  "question_id": "3",
  "question_text": "Instructions for the table. Multiple answers per row are possible.\n\nOptions: Option A, Option B, Option C",
  "subquestions": [
    {"question_id": "3a", "question_text": "First statement", "answer_field": ""},
    {"question_id": "3b", "question_text": "Second statement", "answer_field": ""}
  ]
}

=========== IMPORTANT RULES ===========

1. question_text must be VERBATIM from the exam, keep the original language
2. Multiple choice questions MUST list all available options in question_text
3. Use hierarchy (parent + subquestions) for tables and multi-part questions
4. Parent questions have NO answer_field, only subquestions do
5. All answerable questions (leaf nodes) must have answer_field: ""
6. Extract ALL questions - do not skip any
7. DO NOT include points/scores in this step"#
    }

    /// User instructions accompanying the exam PDF.
    pub fn answer_sheet_instructions() -> &'static str {
        r#"
METADATA:
Profession: {profession}
Year: {year}

Return JSON with self-contained questions:
{
  "questions": [
    {"question_id": "1", "question_text": "Full context and question text verbatim...", "answer_field": ""},
    {
      "question_id": "2",
      "question_text": "Context + instructions for table...",
      "subquestions": [
        {"question_id": "2a", "question_text": "Item text", "answer_field": ""}
      ]
    }
  ]
}"#
    }

    /// System prompt for filling solutions, criteria and points into an answer sheet.
    pub fn solution_sheet_system() -> &'static str {
        r#"You are extracting solutions from an exam solution PDF.

YOUR TASK:
Take the provided ANSWER SHEET JSON and add `solution_field`, `grading_criteria` and `points`
to each question based on the solution PDF. Keep the EXACT same structure.

Add to each question/subquestion:
- solution_field: the correct answer (verbatim from the solution PDF)
- grading_criteria: how to award points (from the solution PDF or reasonably inferred)
- points: the maximum points achievable for this question (number)

Example:
{
  "question_id": "1",
  "question_text": "...",
  "answer_field": "",
  "solution_field": "The three main differences are: 1) ..., 2) ..., 3) ...",
  "grading_criteria": "1 point per correct difference (max 3 points)",
  "points": 3
}

RULES:
1. Keep the same question_ids and the same hierarchy as the answer sheet
2. Extract solutions VERBATIM from the solution PDF
3. Extract or infer reasonable grading criteria
4. For parent questions, points is the sum of their subquestions
5. Keep the original language (do not translate)
6. Return ONLY valid JSON"#
    }

    /// Metadata and answer sheet sent along with the solution PDF.
    pub fn solution_sheet_input() -> &'static str {
        r#"METADATA:
Profession: {profession}
Year: {year}

=========== INPUT DATA ===========

Here is the ANSWER SHEET JSON structure you must fill:
{answer_sheet}

Return the FULL JSON with solutions filled in."#
    }

    /// System prompt for the candidate model.
    pub fn exam_taker_system(with_retrieval: bool) -> String {
        let mut prompt = String::from(
            "You are taking a Swiss professional exam.\n\
             You will be presented with questions one by one.\n",
        );
        if with_retrieval {
            prompt.push_str("You will also receive 'RETRIEVED CONTEXT' from a database.\n");
        }
        prompt.push_str(
            "Read each question carefully and provide the answer.\n\n\
             INSTRUCTIONS:\n\
             - Provide ONLY the answer text. Do not include 'Answer:', 'Here is the answer', or reasoning unless explicitly asked.\n",
        );
        if with_retrieval {
            prompt.push_str(
                "- Use the RETRIEVED CONTEXT if it helps answer the question.\n\
                 - The retrieved context might be irrelevant. If so, ignore it and answer based on your knowledge.\n",
            );
        }
        prompt.push_str(
            "- For multiple choice questions:\n\
             \x20 * Provide ONLY the answer (letter/number/option/text)\n\
             \x20 * If multiple answers are correct, provide all of them (e.g., 'a, c' or 'Bundesrat, Kantone')\n\
             - For open questions: provide concise, accurate answers\n\
             - Keep original language (do NOT translate)\n",
        );
        prompt
    }

    /// Parent context shown to the candidate before its subquestions.
    pub fn group_context() -> &'static str {
        "CONTEXT FOR FOLLOWING QUESTIONS:\n{text}\n\nPlease confirm you understood the context by replying 'Understood'."
    }

    /// Parent context in retrieval mode, answered with a fixed acknowledgement.
    pub fn group_context_rag() -> &'static str {
        "QUESTION CONTEXT:\n{text}"
    }

    /// A single answerable question.
    pub fn question() -> &'static str {
        "QUESTION:\n{text}"
    }

    /// System prompt for the judge.
    pub fn judge_system() -> &'static str {
        "You are grading a Swiss professional exam.\n\
         You will be presented with questions, candidate answers, and official solutions one by one.\n\n\
         INSTRUCTIONS:\n\
         - Compare the candidate's answer with the solution.\n\
         - Assign points (0 to max points).\n\
         - Provide brief feedback (1-3 sentences).\n\
         - For MULTIPLE CHOICE:\n\
         \x20 * Award either full points or 0 points (NO partial credit).\n\
         \x20 * ALL correct options must be selected.\n\
         - OUTPUT FORMAT: JSON snippet ONLY\n\
         \x20 {\"points\": <number>, \"feedback\": \"<string>\"}\n\
         - Keep original language (do NOT translate)\n"
    }

    /// Parent context shown to the judge before its subquestions.
    pub fn judge_group_context() -> &'static str {
        "CONTEXT FOR FOLLOWING QUESTIONS:\n{text}\n\nReply 'Understood' to proceed."
    }

    /// Grading request for one leaf question.
    pub fn judge_question() -> &'static str {
        "QUESTION: {question}\n\n\
         CANDIDATE ANSWER: {answer}\n\n\
         OFFICIAL SOLUTION: {solution}\n\
         GRADING CRITERIA: {criteria}\n\
         MAX POINTS: {max_points}\n\n\
         Grade this answer. Return JSON."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompts_are_not_empty() {
        assert!(!Prompts::answer_sheet_system().is_empty());
        assert!(!Prompts::solution_sheet_system().is_empty());
        assert!(!Prompts::judge_system().is_empty());
        assert!(Prompts::answer_sheet_instructions().contains("{profession}"));
        assert!(Prompts::solution_sheet_input().contains("{answer_sheet}"));
        assert!(Prompts::judge_question().contains("{max_points}"));
    }

    #[test]
    fn test_fill_single_pass() {
        let filled = Prompts::fill(
            "A: {answer} S: {solution} {unknown}",
            &[("answer", "{solution}"), ("solution", "TCP")],
        );
        assert_eq!(filled, "A: {solution} S: TCP {unknown}");

        let filled = Prompts::fill(Prompts::judge_question(), &[("max_points", "2")]);
        assert!(filled.contains("MAX POINTS: 2"));
        assert!(filled.contains("{answer}"));
    }

    #[test]
    fn test_exam_taker_mentions_retrieval_only_when_enabled() {
        assert!(Prompts::exam_taker_system(true).contains("RETRIEVED CONTEXT"));
        assert!(!Prompts::exam_taker_system(false).contains("RETRIEVED CONTEXT"));
    }
}
