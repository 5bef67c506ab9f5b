//! Model prompts.

use adlens_models::FinalAnalysis;
use schemars::schema_for;

/// Context passed to the speech-to-text engine.
pub const TRANSCRIPTION_CONTEXT: &str = "This is a Pakistani Urdu advertisement. \
It may mention words like Oud-al-abraj, outlet, purchase or online. \
Transcribe the spoken content in Urdu script.";

pub const TRANSCRIPT_ANALYSIS_SYSTEM: &str = "You are a marketing strategist. \
Reply with English keywords only, as JSON: {\"techniques\": [\"...\"]}. \
Do not add commentary or markdown.";

/// User prompt of the transcript analysis call.
pub fn transcript_analysis(transcript: &str) -> String {
    format!(
        "Review the transcript of this ad and list the selling techniques it uses, for example:\n\
         - emotional storytelling\n\
         - social proof (reviews or testimonials)\n\
         - urgency (limited time, \"buy now\")\n\
         - risk reversal (\"money back if you don't like it\")\n\
         - direct address of the viewer\n\
         - comparison with competitors\n\n\
         Only list techniques that actually appear in the transcript.\n\n\
         Transcript:\n{}",
        transcript.trim()
    )
}

/// Vision prompt sent with every sampled frame.
pub const FRAME_ANALYSIS: &str = "Describe this advertising image with one short label. \
Give the position of the person and what they are doing (for example: sitting with the \
product in hand, standing and explaining, crouching next to the product) or a feature of \
the background (for example: outdoors, packages in the background, red background).";

fn final_analysis_schema() -> String {
    serde_json::to_string_pretty(&schema_for!(FinalAnalysis)).unwrap_or_else(|_| {
        r#"{"hook": "...", "tone": "...", "power_phrases": ["..."], "visual": "..."}"#.to_string()
    })
}

/// Prompt of the final synthesis call.
pub fn synthesis(transcript_summary: &str, visual_summary: &str) -> String {
    format!(
        "Analyze the ad insights below.\n\n\
         Ad transcript summary: {}\n\
         Visual summary: {}\n\n\
         Answer clearly:\n\
         1. What is the main hook line or pattern of this ad, and why does it work?\n\
         2. What is the tone of the ad (emotional, confident, hype, ...)?\n\
         3. Which power phrases or emotional angles stand out?\n\
         4. Which gestures, expressions, camera angles or visuals are impactful?\n\n\
         Write any Urdu phrase in Roman Urdu (Urdu in English script), never in Urdu script.\n\n\
         Reply with a single JSON object matching this schema and nothing else:\n{}",
        transcript_summary.trim(),
        visual_summary.trim(),
        final_analysis_schema()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesis_embeds_schema() {
        let prompt = synthesis("urgency", "standing\noutdoors");
        for field in ["hook", "tone", "power_phrases", "visual"] {
            assert!(prompt.contains(field), "{field}");
        }
        assert!(prompt.contains("standing\noutdoors"));
    }

    #[test]
    fn test_transcript_prompt_includes_text() {
        assert!(transcript_analysis("  aaj hi khareedain \n").ends_with("aaj hi khareedain"));
    }
}
