use std::future::Future;
use std::pin::Pin;

use cast_dispatch::content::{
    fits_direct_api, has_media_extension, sanitize, validate, TextGenerator, LEAK_PREDICATES,
    MAX_TEXT_CHARS,
};
use cast_dispatch::models::item::{ContentKind, Destination, Payload};

fn post(text: &str, images: usize) -> Payload {
    Payload::Post {
        text: text.into(),
        image_refs: (0..images).map(|i| format!("https://img/{i}.png")).collect(),
    }
}

fn repost(comment: Option<&str>) -> Payload {
    Payload::Repost {
        target_ref: "1234".into(),
        comment: comment.map(Into::into),
    }
}

#[test]
fn sanitize_drops_leaked_prompt_lines() {
    let raw = "# Draft\nPrompt: write something cheerful\nName: Hana\n---\n今日はいい天気！\nNote: keep it short";
    assert_eq!(sanitize(raw), "今日はいい天気！");
}

#[test]
fn sanitize_handles_full_width_labels() {
    let raw = "性格：明るい\n注意：絵文字なし\nおはようございます";
    assert_eq!(sanitize(raw), "おはようございます");
}

#[test]
fn sanitize_strips_wrapping_quotes_and_whitespace() {
    assert_eq!(sanitize("  \"Good morning!\"  "), "Good morning!");
    assert_eq!(sanitize("「おはよう」"), "おはよう");
    assert_eq!(sanitize("“nested 『quote』”"), "nested 『quote』");
}

#[test]
fn sanitize_keeps_inner_quotes() {
    assert_eq!(sanitize("\"a\" and \"b\""), "\"a\" and \"b\"");
}

#[test]
fn sanitize_keeps_ordinary_multiline_text() {
    let raw = "line one\nline two";
    assert_eq!(sanitize(raw), raw);
}

#[test]
fn predicate_list_is_explicit() {
    let names: Vec<&str> = LEAK_PREDICATES.iter().map(|p| p.name).collect();
    assert_eq!(
        names,
        vec![
            "markdown_heading",
            "instruction_echo",
            "profile_label",
            "separator_rule"
        ]
    );
}

#[test]
fn post_limits() {
    assert!(validate(ContentKind::Post, &post("hi", 4), Destination::Auto).is_ok());

    let at_limit = "あ".repeat(MAX_TEXT_CHARS);
    assert!(validate(ContentKind::Post, &post(&at_limit, 0), Destination::DirectApi).is_ok());

    let padded = format!("   {at_limit}   ");
    assert!(validate(ContentKind::Post, &post(&padded, 0), Destination::DirectApi).is_ok());

    let over = "a".repeat(MAX_TEXT_CHARS + 1);
    let err = validate(ContentKind::Post, &post(&over, 0), Destination::Relay).unwrap_err();
    assert!(err.to_string().contains("281 characters"));

    assert!(validate(ContentKind::Post, &post("hi", 5), Destination::Relay).is_err());
}

#[test]
fn direct_api_posts_carry_one_image() {
    assert!(validate(ContentKind::Post, &post("hi", 1), Destination::DirectApi).is_ok());
    let err = validate(ContentKind::Post, &post("hi", 3), Destination::DirectApi).unwrap_err();
    assert!(err.to_string().contains("at most 1 image"), "{err}");
    assert!(validate(ContentKind::Post, &post("hi", 3), Destination::Relay).is_ok());

    assert!(fits_direct_api(&post("hi", 1)));
    assert!(!fits_direct_api(&post("hi", 2)));
    assert!(fits_direct_api(&repost(None)));
}

#[test]
fn media_extensions_are_allowlisted() {
    for ok in [
        "a.jpg",
        "photo.JPEG",
        "https://cdn.example.com/x/clip.mp4",
        "https://cdn.example.com/y.webp?sig=abc#frag",
        "/tmp/anim.gif",
    ] {
        assert!(has_media_extension(ok), "{ok}");
    }
    for bad in [
        "notes.txt",
        "archive.png.zip",
        "https://cdn.example.com/image",
        "https://cdn.example.com/dir.png/",
        ".png",
        "script.exe?x=.png",
    ] {
        assert!(!has_media_extension(bad), "{bad}");
    }

    let payload = Payload::Post {
        text: "hi".into(),
        image_refs: vec!["a.png".into(), "doc.pdf".into()],
    };
    let err = validate(ContentKind::Post, &payload, Destination::Relay).unwrap_err();
    assert!(err.to_string().contains("doc.pdf"), "{err}");
}

#[test]
fn empty_payload_is_rejected() {
    assert!(validate(ContentKind::Post, &post("   ", 0), Destination::Auto).is_err());
    let blank_target = Payload::Repost {
        target_ref: " ".into(),
        comment: None,
    };
    assert!(validate(ContentKind::Retweet, &blank_target, Destination::Auto).is_err());
}

#[test]
fn kind_and_payload_must_agree() {
    assert!(validate(ContentKind::Post, &repost(None), Destination::Auto).is_err());
    assert!(validate(ContentKind::Retweet, &post("hi", 0), Destination::Auto).is_err());
}

#[test]
fn quote_needs_comment_and_retweet_forbids_one() {
    assert!(validate(ContentKind::QuoteRetweet, &repost(Some("great")), Destination::Auto).is_ok());
    assert!(validate(ContentKind::QuoteRetweet, &repost(None), Destination::Auto).is_err());
    assert!(validate(ContentKind::QuoteRetweet, &repost(Some("  ")), Destination::Auto).is_err());
    assert!(validate(ContentKind::Retweet, &repost(None), Destination::Auto).is_ok());
    assert!(validate(ContentKind::Retweet, &repost(Some("hi")), Destination::Auto).is_err());
}

#[test]
fn webhook_only_takes_reposts() {
    assert!(validate(ContentKind::Retweet, &repost(None), Destination::Webhook).is_ok());
    let err = validate(ContentKind::Post, &post("hi", 0), Destination::Webhook).unwrap_err();
    assert!(err.to_string().starts_with("validation:"));
}

struct Echo;

impl TextGenerator for Echo {
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = cast_dispatch::Result<String>> + Send + 'a>> {
        Box::pin(async move { Ok(format!("Prompt: {prompt}\n\"{prompt}!\"")) })
    }
}

#[tokio::test]
async fn generator_output_sanitises_cleanly() {
    let raw = Echo.generate("hello").await.unwrap();
    assert_eq!(sanitize(&raw), "hello!");
}
