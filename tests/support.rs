#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use labcheck::{
    ReasoningService,
    error::ReasoningServiceError,
    reasoning::{
        ExtractPurpose, ExtractRequest, VisualCategory, VisualDescription, VisualRequest,
    },
};
use lopdf::{
    Document, Object, Stream,
    content::{Content, Operation},
    dictionary,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// One call observed by [`ScriptedService`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Extract {
        purpose: ExtractPurpose,
        subject: Option<String>,
        context: String,
    },
    Visual {
        reference: String,
        page:      u32,
    },
}

/// In-memory reasoning service returning canned payloads.
///
/// Unscripted evaluations score 8 on every criterion; unscripted visuals are
/// described as text naming their reference.
#[derive(Default)]
pub struct ScriptedService {
    assignment:           Option<Result<Value, ReasoningServiceError>>,
    mapping:              Option<Result<Value, ReasoningServiceError>>,
    evaluations:          HashMap<String, Result<Value, ReasoningServiceError>>,
    visuals:              HashMap<String, Result<VisualDescription, ReasoningServiceError>>,
    delay:                Duration,
    cancel_on:            Option<(ExtractPurpose, CancellationToken)>,
    calls:                Mutex<Vec<Call>>,
    in_flight:            AtomicUsize,
    peak:                 AtomicUsize,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assignment(mut self, payload: Value) -> Self {
        self.assignment = Some(Ok(payload));
        self
    }

    pub fn assignment_fails(mut self, error: ReasoningServiceError) -> Self {
        self.assignment = Some(Err(error));
        self
    }

    pub fn mapping(mut self, payload: Value) -> Self {
        self.mapping = Some(Ok(payload));
        self
    }

    pub fn mapping_fails(mut self, error: ReasoningServiceError) -> Self {
        self.mapping = Some(Err(error));
        self
    }

    pub fn evaluation(mut self, task_id: &str, payload: Value) -> Self {
        self.evaluations.insert(task_id.to_string(), Ok(payload));
        self
    }

    pub fn evaluation_fails(mut self, task_id: &str, error: ReasoningServiceError) -> Self {
        self.evaluations.insert(task_id.to_string(), Err(error));
        self
    }

    pub fn visual_fails(mut self, reference: &str, error: ReasoningServiceError) -> Self {
        self.visuals.insert(reference.to_string(), Err(error));
        self
    }

    pub fn visual(mut self, reference: &str, description: VisualDescription) -> Self {
        self.visuals.insert(reference.to_string(), Ok(description));
        self
    }

    /// Every call sleeps this long before answering.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Triggers `token` as soon as the first `purpose` call starts.
    pub fn cancel_on(mut self, purpose: ExtractPurpose, token: CancellationToken) -> Self {
        self.cancel_on = Some((purpose, token));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("call log").clone()
    }

    pub fn extract_calls(&self, purpose: ExtractPurpose) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Extract { purpose: p, .. } if *p == purpose))
            .collect()
    }

    pub fn evaluated_subjects(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Extract {
                    purpose: ExtractPurpose::TaskEvaluation,
                    subject,
                    ..
                } => subject,
                _ => None,
            })
            .collect()
    }

    pub fn visual_references(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Visual { reference, .. } => Some(reference),
                Call::Extract { .. } => None,
            })
            .collect()
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) {
        self.calls.lock().expect("call log").push(call);
    }

    async fn pause(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReasoningService for ScriptedService {
    async fn structured_extract(
        &self,
        request: &ExtractRequest,
    ) -> Result<Value, ReasoningServiceError> {
        self.record(Call::Extract {
            purpose: request.purpose,
            subject: request.subject.clone(),
            context: request.context.clone(),
        });
        if let Some((purpose, token)) = &self.cancel_on
            && *purpose == request.purpose
        {
            token.cancel();
        }
        self.pause().await;

        let unscripted =
            |what: &str| Err(ReasoningServiceError::Permanent(format!("no {what} scripted")));
        match request.purpose {
            ExtractPurpose::AssignmentStructure => {
                self.assignment.clone().unwrap_or_else(|| unscripted("assignment"))
            }
            ExtractPurpose::SubmissionMapping => {
                self.mapping.clone().unwrap_or_else(|| unscripted("mapping"))
            }
            ExtractPurpose::TaskEvaluation => {
                let subject = request.subject.clone().unwrap_or_default();
                self.evaluations
                    .get(&subject)
                    .cloned()
                    .unwrap_or_else(|| Ok(uniform_scores(8.0)))
            }
        }
    }

    async fn describe_visual(
        &self,
        request: &VisualRequest,
    ) -> Result<VisualDescription, ReasoningServiceError> {
        self.record(Call::Visual {
            reference: request.reference.clone(),
            page:      request.page,
        });
        self.pause().await;

        self.visuals
            .get(&request.reference)
            .cloned()
            .unwrap_or_else(|| {
                Ok(VisualDescription {
                    category: VisualCategory::Text,
                    content:  format!("described {}", request.reference),
                    summary:  None,
                })
            })
    }
}

/// Evaluation payload giving `score` on every criterion.
pub fn uniform_scores(score: f64) -> Value {
    json!({
        "scores": {
            "completeness": score,
            "correctness": score,
            "code_quality": score,
            "documentation": score,
            "testing": score,
        },
        "strengths": ["clear structure"],
        "weaknesses": [],
        "feedback": "Well done.",
    })
}

/// Assignment payload with one task per id, titled `Task <id>`.
pub fn assignment_payload(ids: &[&str]) -> Value {
    let tasks: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "title": format!("Task {id}"),
                "description": format!("Implement part {id}."),
                "requirements": [format!("{id} requirement")],
            })
        })
        .collect();
    json!({
        "document_metadata": { "title": "Lab 3", "course": "CS 101" },
        "tasks": tasks,
        "global_requirements": { "general_guidelines": ["Comment your code"] },
    })
}

/// Mapping payload answering each `(task_id, status)` pair.
pub fn mapping_payload(answers: &[(&str, &str)]) -> Value {
    let answers: Vec<Value> = answers
        .iter()
        .map(|(id, status)| {
            json!({
                "task_id": id,
                "status": status,
                "implementation_summary": format!("Work for {id}"),
                "evidence": [format!("excerpt for {id}")],
            })
        })
        .collect();
    json!({ "task_answers": answers })
}

/// One item on a synthesized page.
pub enum PageItem {
    /// A text line drawn at `y`.
    Text(i64, &'static str),
    /// A 2x2 grayscale image whose top edge sits at `y`.
    Image(i64),
    /// Paints an XObject absent from the page resources at `y`.
    Dangling(i64),
}

/// Builds a PDF with one page per entry of `pages`.
pub fn pdf(pages: &[Vec<PageItem>]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 2,
            "Height" => 2,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
        },
        vec![0, 255, 255, 0],
    ));
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
        "XObject" => dictionary! { "Im1" => image_id },
    });

    let mut kids = Vec::new();
    for items in pages {
        let mut operations = Vec::new();
        for item in items {
            match item {
                PageItem::Text(y, text) => operations.extend([
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), (*y).into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ]),
                PageItem::Image(y) => operations.extend(paint("Im1", *y)),
                PageItem::Dangling(y) => operations.extend(paint("Gone", *y)),
            }
        }
        let content = Content { operations }.encode().expect("encode page content");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        kids.push(Object::Reference(page_id));
    }

    finish(doc, pages_id, kids)
}

/// Places XObject `name` as a 100pt square whose top edge sits at `y`.
fn paint(name: &str, y: i64) -> [Operation; 4] {
    [
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![100.into(), 0.into(), 0.into(), 100.into(), 72.into(), (y - 100).into()],
        ),
        Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
        Operation::new("Q", vec![]),
    ]
}

/// A structurally valid PDF whose page tree is empty.
pub fn empty_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    finish(doc, pages_id, Vec::new())
}

fn finish(mut doc: Document, pages_id: lopdf::ObjectId, kids: Vec<Object>) -> Vec<u8> {
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal("Lab 3"),
        "Author" => Object::string_literal("Course Staff"),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("serialize pdf");
    bytes
}

/// A simple text-only assignment document.
pub fn assignment_pdf() -> Vec<u8> {
    pdf(&[vec![
        PageItem::Text(760, "Lab 3: Sorting"),
        PageItem::Text(700, "T1 Implement insertion sort"),
        PageItem::Text(640, "T2 Implement merge sort"),
    ]])
}

/// A text-only submission document.
pub fn submission_pdf() -> Vec<u8> {
    pdf(&[vec![
        PageItem::Text(760, "Student submission"),
        PageItem::Text(700, "fn insertion_sort(v: &mut [i32])"),
    ]])
}
