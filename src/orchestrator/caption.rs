//! Caption prompts and the placeholder used when captioning fails

/// Wrap a theme in the social-media caption instruction
pub fn caption_prompt(theme: &str) -> String {
    format!(
        "As a professional social media manager, create an engaging and concise caption \
         for the following theme: '{}'. The caption should include 2-3 relevant hashtags \
         and be ready to publish.",
        theme.trim()
    )
}

/// Caption used when the caption sub-step fails
pub fn placeholder_caption(theme: &str) -> String {
    format!(
        "Exciting content about {}! Transform your social media strategy with AI-powered \
         content generation. #AI #SocialMedia #ContentCreation",
        theme.trim()
    )
}
