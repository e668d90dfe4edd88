//! Reply shaping: turn a Gemini response into text Messenger can display.
//!
//! Messenger renders plain text only, so markdown emphasis is stripped and list
//! bullets become "•". Structured answers are assembled from their three fields.
//! The fixed user-facing strings live here too.

use serde::Deserialize;

/// Postback payload of the page's "Get Started" button.
pub const GET_STARTED_PAYLOAD: &str = "GET_STARTED_PAYLOAD";

/// Welcome text for the educational tutor (structured mode).
pub const WELCOME_TUTOR: &str =
    "أهلاً بك! 👋 أنا مساعدك التعليمي. يمكنك سؤالي عن أي شيء تحتاج إليه في دراستك.";

/// Welcome text for the social assistant (plain mode).
pub const WELCOME_SOCIAL: &str = "أهلاً بك! 👋 أنا مساعدك الشخصي الجديد. يمكنك سؤالي عن أي موضوع يخطر ببالك، سواء كان اجتماعياً، ثقافياً، أو مجرد دردشة ودية!";

/// Persona for structured mode. The response schema enforces the JSON shape; the prompt names the fields too.
pub const TUTOR_INSTRUCTION: &str = "أنت مساعد تعليمي متخصص. مهمتك هي تقديم إجابات مفصلة ومُبسطة للطلاب. قم بتوجيه الطلاب من خلال طرح أسئلة توجيهية بعد إجاباتك. حافظ على لهجة محفزة ومرحبة. يجب أن يكون ردك بصيغة JSON فقط، ويحتوي على الحقول التالية: 'title' (للموضوع), 'body' (للتفاصيل), و 'question' (للسؤال الموجه للطالب).";

/// Persona for plain mode.
pub const SOCIAL_INSTRUCTION: &str = "أنت مساعد اجتماعي وودي، مهمتك هي إجراء محادثات ممتعة ومفيدة حول مواضيع متنوعة. حافظ على لهجة دافئة، مرحبة، وقريبة من المستخدم. يمكنك تقديم معلومات، إجابات على أسئلة عامة، أو ببساطة الدردشة. تجاوب مع الأسئلة المفتوحة بلباقة وحماس. استخدم تنسيق Markdown بذكاء لتمييز النقاط الرئيسية.";

/// Sent when the model returned no candidate text.
pub const NO_ANSWER: &str = "عذرًا، لم أتمكن من العثور على إجابة. يرجى المحاولة مرة أخرى.";

/// Sent when the upstream response (or the structured JSON inside it) could not be parsed.
pub const PROCESSING_APOLOGY: &str = "عذرًا، كانت هناك مشكلة في معالجة الاستجابة من الخادم.";

/// Sent when every attempt failed or the upstream rejected the request.
pub const CONNECTION_APOLOGY: &str =
    "عذرًا، حدث خطأ أثناء الاتصال. يرجى التحقق من مفتاح API أو المحاولة لاحقًا.";

/// Shape the model is asked to produce in structured mode.
#[derive(Debug, Deserialize)]
pub struct StructuredAnswer {
    pub title: String,
    pub body: String,
    pub question: String,
}

/// Text of the first part of the first candidate, if any.
pub fn candidate_text(response: &serde_json::Value) -> Option<&str> {
    response
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .get(0)?
        .get("text")?
        .as_str()
}

/// Parse the candidate text as a structured answer and join it as "title\n\nbody\n\nquestion".
pub fn assemble_structured(raw: &str) -> Result<String, serde_json::Error> {
    let answer: StructuredAnswer = serde_json::from_str(raw)?;
    Ok(format!(
        "{}\n\n{}\n\n{}",
        answer.title, answer.body, answer.question
    ))
}

/// Strip `**bold**` and `*italic*` markers and turn a leading "- " on each line into "• ".
pub fn sanitize_plain_text(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            let line = strip_paired(line, "**");
            let line = strip_paired(&line, "*");
            match line.strip_prefix("- ") {
                Some(rest) => format!("• {}", rest),
                None => line,
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Remove each non-overlapping pair of `marker` on a single line, keeping the text between.
/// An unpaired trailing marker is left as is.
fn strip_paired(line: &str, marker: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(open) = rest.find(marker) {
        let after_open = &rest[open + marker.len()..];
        let Some(close) = after_open.find(marker) else {
            break;
        };
        out.push_str(&rest[..open]);
        out.push_str(&after_open[..close]);
        rest = &after_open[close + marker.len()..];
    }
    out.push_str(rest);
    out
}
