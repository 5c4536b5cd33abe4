pub struct PromptContext<'a> {
    pub title: &'a str,
    pub url: &'a str,
    pub host: &'a str,
    pub label_names: &'a [String],
    pub allow_new_labels: bool,
    pub custom_prompt: &'a str,
}

pub fn build_prompt(ctx: &PromptContext<'_>) -> String {
    let mut lines = vec![
        "You are an assistant that categorizes browser tabs.".to_string(),
        format!("Title: {}", ctx.title),
        format!("URL: {}", ctx.url),
        format!("Domain: {}", ctx.host),
        format!("Existing labels: {}", ctx.label_names.join(", ")),
    ];

    let custom = ctx.custom_prompt.trim();
    if !custom.is_empty() {
        lines.push("Custom instructions:".to_string());
        lines.push(custom.to_string());
    }

    lines.push(if ctx.allow_new_labels {
        "You may choose an existing label or create a new short label (1-4 words).".to_string()
    } else {
        "You must choose exactly one label from the existing labels.".to_string()
    });
    lines.push(r#"Return ONLY a JSON object like: {"label":"..."}"#.to_string());
    lines.push("No extra keys, no markdown, no explanations.".to_string());
    lines.join("\n")
}
