//! Prompts for the vision analysis, map critique, refine reduction and Q&A.
//!
//! Every prompt lives here so that tests can inspect them without a model
//! and so wording changes never touch retry or error-handling code.
//! Callers can override the vision prompt via
//! [`crate::config::CriticConfig::analysis_prompt`].

/// The five evaluative dimensions every report summary must cover.
pub const REPORT_DIMENSIONS: [&str; 5] = [
    "Navigation Flow",
    "Brand Consistency",
    "Conversion Funnel",
    "Technical SEO",
    "Emotional Journey",
];

/// Vision prompt for one screenshot segment.
///
/// The placeholder `{segment}` is replaced with the scan-position index.
pub const SEGMENT_ANALYSIS_PROMPT: &str = r#"You are a user experience expert. Analyze the following image segment of a website thoroughly.

Part 1: Detailed Analysis
- Translate the image content into text.
- Describe all the text content in detail.
- Describe all visible elements in detail (for example: hero section, layout, textual content, imagery, color scheme, fonts, and design patterns).

Part 2: Professional Critique
- Evaluate this segment from a marketing and user experience perspective.
- Focus on design aesthetics, content clarity, and ease of navigation.
- Provide constructive feedback and suggest specific improvements.

Segment Identifier: Segment {segment}

Please structure your response as follows:

Segment Analysis:
[Your detailed analysis here]

Critique:
[Your professional critique here]"#;

/// Map-stage prompt: critique one segment's analysis text.
///
/// The placeholder `{text}` is replaced with the document body.
pub const SEGMENT_CRITIQUE_PROMPT: &str = r#"You are a UX and marketing expert who has helped many companies improve their website's user experience. Provide a critique of the website segment described below, focusing on:

1. Content & Messaging:
   - Clarity of headlines and subheadlines
   - Readability (sentence length, jargon, SEO keyword density)
   - Clarity of the value proposition

2. User Experience:
   - CTA placement (above/below the fold)
   - Form field complexity and carousel usability

3. Trust & Credibility:
   - Presence and authenticity of trust badges and testimonials
   - Security indicators (SSL, privacy policies)

4. Conversion Elements:
   - Use of urgency tactics (deadlines, scholarships)
   - Risk-reduction offers (free trials, refunds)
   - Button contrast versus background

Give actionable suggestions. Only criticise what you are sure about, and quote the exact piece of content you are criticising so it can be found and fixed.

The segment text has two sections: "Segment Analysis" describes what is on screen, "Critique" is a vision model's first-pass critique; treat both as accurate.

Segment Text:
{text}

Answer in this shape:
Critics_points:
1. ...

Improvement_suggestions:
1. ..."#;

/// Reduce-stage prompt for the first analysis.
///
/// The placeholder `{text}` is replaced with the first mapped analysis.
pub const INITIAL_REPORT_PROMPT: &str = r#"You are a UX expert who has helped many companies improve their website's user experience. Write a concise critique report of a website covering exactly these aspects:

1. Navigation Flow:
   - Logical journey from awareness to conversion
   - Internal linking strategy and breadcrumb consistency

2. Brand Consistency:
   - Color/font consistency and tone of voice
   - Logo placement and overall brand presentation

3. Conversion Funnel:
   - Friction points across segments
   - Presence of lead magnets and clarity of CTAs

4. Technical SEO:
   - Meta descriptions, schema markup, and canonical issues

5. Emotional Journey:
   - Use of emotional triggers (fear, FOMO, aspiration)
   - Storytelling and cognitive load

Only criticise what you are sure about and quote the exact content you are criticising.

Analysis text:
{text}

CONCISE CRITIQUE REPORT (one paragraph per aspect, each starting with its name followed by a colon):"#;

/// Reduce-stage prompt for every later analysis.
///
/// Placeholders: `{existing_answer}` (running summary) and `{text}`.
pub const REFINE_REPORT_PROMPT: &str = r#"You are a UX expert refining a preliminary critique report of a website. The final report must keep and clearly present all of these aspects:

1. Navigation Flow:
   - A logical journey from awareness to conversion
   - Internal linking strategy and breadcrumb consistency

2. Brand Consistency:
   - Color/font consistency and tone of voice
   - Logo placement and overall brand presentation

3. Conversion Funnel:
   - Identification of friction points across segments
   - Presence of lead magnets and clarity of CTAs

4. Technical SEO:
   - Meta descriptions, schema markup, and canonical issues

5. Emotional Journey:
   - Use of emotional triggers (fear, FOMO, aspiration)
   - Storytelling and cognitive load

Existing summary:
{existing_answer}

Additional context:
{text}

Refine the existing summary using the additional context. Merge, do not restart. Every aspect above must remain, each paragraph starting with its name followed by a colon. If the additional context adds nothing, return the existing summary unchanged."#;

/// Retrieval-augmented Q&A prompt.
///
/// Placeholders: `{context}` and `{question}`.
pub const QA_PROMPT: &str = r#"You are a UX expert. Use the following analyses of website segments to answer the question. If the analyses do not contain the answer, say so.

{context}

Question: {question}"#;

/// Build the vision prompt for segment `index`.
pub fn segment_analysis_prompt(template: Option<&str>, index: u32) -> String {
    template
        .unwrap_or(SEGMENT_ANALYSIS_PROMPT)
        .replace("{segment}", &index.to_string())
}

/// Build the map-stage prompt for one document body.
pub fn segment_critique_prompt(text: &str) -> String {
    SEGMENT_CRITIQUE_PROMPT.replace("{text}", text)
}

/// Build the seed prompt of the reduce stage.
pub fn initial_report_prompt(analysis: &str) -> String {
    INITIAL_REPORT_PROMPT.replace("{text}", analysis)
}

/// Build a refine prompt from the running summary and the next analysis.
pub fn refine_report_prompt(running_summary: &str, analysis: &str) -> String {
    // `{text}` first: a summary that happens to contain the literal
    // "{text}" must not receive the analysis.
    REFINE_REPORT_PROMPT
        .replace("{text}", analysis)
        .replace("{existing_answer}", running_summary)
}

/// Build a Q&A prompt from retrieved segment texts.
pub fn qa_prompt(context_segments: &[&str], question: &str) -> String {
    let context = context_segments.join("\n\n");
    QA_PROMPT
        .replace("{question}", question)
        .replace("{context}", &context)
}
