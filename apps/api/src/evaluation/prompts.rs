//! Prompt constants for the three evaluation stages.

/// Retrieval queries per stage. The index is seeded with the hiring pack
/// (job description, case brief, both rubrics) before any evaluation runs.
pub const JOB_DESCRIPTION_QUERY: &str = "Backend Developer Job Description";
pub const CV_RUBRIC_QUERY: &str = "CV Evaluation Scoring Rubric";
pub const CASE_BRIEF_QUERY: &str = "Case Study Brief";
pub const PROJECT_RUBRIC_QUERY: &str = "Project Deliverable Evaluation Scoring Rubric";

/// CV stage. Replace `{job_title}`, `{context}`, `{rubric}`, `{cv_text}`.
pub const CV_EVAL_PROMPT_TEMPLATE: &str = r#"You are a senior technical recruiter evaluating a candidate for the role of {job_title}.

Context:
{context}

CV Rubric:
{rubric}

Evaluate the following CV and provide:
Match Rate: a number between 0.0 and 1.0
Feedback: actionable feedback

CV:
{cv_text}
"#;

/// Project stage. Replace `{context}`, `{rubric}`, `{project_text}`.
pub const PROJECT_EVAL_PROMPT_TEMPLATE: &str = r#"You are a senior engineer reviewing a candidate's project deliverable.

Context:
{context}

Project Rubric:
{rubric}

Evaluate the following project report and provide:
Score: a number between 1.0 and 5.0
Feedback: actionable feedback

Project Report:
{project_text}
"#;

/// Summary stage consumes the stage outputs, not the raw documents.
/// Replace `{cv_evaluation}`, `{project_evaluation}`.
pub const SUMMARY_PROMPT_TEMPLATE: &str = r#"Given the CV evaluation:
{cv_evaluation}

And the project evaluation:
{project_evaluation}

Write a concise overall summary of the candidate in 3-5 sentences."#;
