use crate::http::HttpResponse;
use crate::rules::expr::Value;
use crate::rules::{ExtractSource, Extractor};
use super::context::EvaluationContext;

/// Run a step's extractors, binding each result by name. A regex that does
/// not match binds an empty string.
pub fn run_extractors(extractors: &[Extractor], response: &HttpResponse, ctx: &mut EvaluationContext) {
    for extractor in extractors {
        let value = extract(extractor, response);
        ctx.set(&extractor.name, Value::Str(value));
    }
}

fn extract(extractor: &Extractor, response: &HttpResponse) -> String {
    let source = match &extractor.source {
        ExtractSource::Status => response.status.to_string(),
        ExtractSource::Body => response.body.clone(),
        ExtractSource::Headers => response.headers_text(),
        ExtractSource::ContentType => response.content_type().to_string(),
        ExtractSource::Elapsed => response.elapsed_ms().to_string(),
        ExtractSource::Header(name) => response.header(name).unwrap_or("").to_string(),
    };

    match &extractor.regex {
        Some(re) => re
            .captures(&source)
            .and_then(|caps| caps.get(extractor.group))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        None => source,
    }
}
