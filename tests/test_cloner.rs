//! Cross-document cloning: filter vetoes, inherited attribute inlining,
//! and graph integrity.

use std::collections::HashMap;

use pdf_forge::{CloneContext, Cloner, Document, Object, ObjectRef, SaveMode, Version};

fn dict(entries: &[(&str, Object)]) -> Object {
    Object::Dictionary(
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    )
}

/// Source document holding a two-level page tree where the media box and
/// resources live on the root node, not the page.
fn page_tree_document() -> (Document, ObjectRef) {
    let mut doc = Document::new(Version::default());

    let contents = doc.register(Object::stream(HashMap::new(), &b"0 0 10 10 re f"[..]));
    let font = doc.register(dict(&[("Type", Object::name("Font"))]));
    let pages_root = doc.register(Object::Null);
    let page = doc.register(dict(&[
        ("Type", Object::name("Page")),
        ("Parent", Object::Reference(pages_root)),
        ("Contents", Object::Reference(contents)),
    ]));
    doc.update(
        pages_root,
        dict(&[
            ("Type", Object::name("Pages")),
            ("Kids", Object::Array(vec![Object::Reference(page)])),
            ("Count", Object::Integer(1)),
            (
                "MediaBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(612),
                    Object::Integer(792),
                ]),
            ),
            (
                "Resources",
                dict(&[("Font", dict(&[("F1", Object::Reference(font))]))]),
            ),
        ]),
    )
    .unwrap();
    (doc, page)
}

#[test]
fn cloned_page_inlines_inherited_attributes() {
    let (mut source, page) = page_tree_document();
    let mut target = Document::new(Version::default());

    let cloned = {
        let mut ctx = CloneContext::new(&mut source, &mut target);
        Cloner::new().clone_reference(&mut ctx, page).unwrap()
    };

    let clone = target.resolve(cloned).unwrap();
    let clone = clone.as_dict().unwrap();

    // The parent back-link stays behind; the tree-level attributes come
    // along inlined.
    assert!(!clone.contains_key("Parent"));
    let media_box = clone["MediaBox"].as_array().unwrap();
    assert_eq!(media_box[2], Object::Integer(612));
    assert!(clone.contains_key("Resources"));
    // Rotate was nowhere on the ancestry, so it stays absent.
    assert!(!clone.contains_key("Rotate"));
}

#[test]
fn cloned_page_reaches_its_content_stream() {
    let (mut source, page) = page_tree_document();
    let mut target = Document::new(Version::default());

    let cloned = {
        let mut ctx = CloneContext::new(&mut source, &mut target);
        Cloner::new().clone_reference(&mut ctx, page).unwrap()
    };

    let clone = target.resolve(cloned).unwrap();
    let contents = clone.as_dict().unwrap()["Contents"].as_reference().unwrap();
    match target.resolve(contents).unwrap() {
        Object::Stream { data, .. } => assert_eq!(&data[..], b"0 0 10 10 re f"),
        other => panic!("expected stream, got {:?}", other),
    }
}

#[test]
fn inherited_resources_clone_their_references() {
    let (mut source, page) = page_tree_document();
    let mut target = Document::new(Version::default());

    let cloned = {
        let mut ctx = CloneContext::new(&mut source, &mut target);
        Cloner::new().clone_reference(&mut ctx, page).unwrap()
    };

    let clone = target.resolve(cloned).unwrap();
    let font_ref = clone.as_dict().unwrap()["Resources"]
        .as_dict()
        .unwrap()["Font"]
        .as_dict()
        .unwrap()["F1"]
        .as_reference()
        .unwrap();
    // The font landed in the target and resolves there.
    let font = target.resolve(font_ref).unwrap();
    assert_eq!(font.as_dict().unwrap()["Type"], Object::name("Font"));
}

#[test]
fn annotation_page_backlink_stays_behind() {
    let mut source = Document::new(Version::default());
    let mut target = Document::new(Version::default());

    let page_stub = source.register(Object::Null);
    let annot = source.register(dict(&[
        ("Subtype", Object::name("Link")),
        (
            "Rect",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(50),
                Object::Integer(50),
            ]),
        ),
        ("P", Object::Reference(page_stub)),
    ]));

    let cloned = {
        let mut ctx = CloneContext::new(&mut source, &mut target);
        Cloner::new().clone_reference(&mut ctx, annot).unwrap()
    };

    let clone = target.resolve(cloned).unwrap();
    let clone = clone.as_dict().unwrap();
    assert!(!clone.contains_key("P"));
    assert_eq!(clone["Subtype"], Object::name("Link"));
    // The page stub never crossed over.
    assert_eq!(target.max_number(), cloned.number);
}

#[test]
fn shared_objects_clone_once_within_an_operation() {
    let mut source = Document::new(Version::default());
    let mut target = Document::new(Version::default());

    let shared = source.register(Object::text("shared"));
    let a = source.register(Object::Array(vec![Object::Reference(shared)]));
    let b = source.register(Object::Array(vec![Object::Reference(shared)]));

    let mut ctx = CloneContext::new(&mut source, &mut target);
    let cloner = Cloner::new();
    let ca = cloner.clone_reference(&mut ctx, a).unwrap();
    let cb = cloner.clone_reference(&mut ctx, b).unwrap();
    drop(ctx);

    let ra = target.resolve(ca).unwrap().as_array().unwrap()[0]
        .as_reference()
        .unwrap();
    let rb = target.resolve(cb).unwrap().as_array().unwrap()[0]
        .as_reference()
        .unwrap();
    assert_eq!(ra, rb);
}

#[test]
fn cloned_graph_survives_a_save() {
    let (mut source, page) = page_tree_document();
    let mut target = Document::new(Version::default());

    let cloned = {
        let mut ctx = CloneContext::new(&mut source, &mut target);
        Cloner::new().clone_reference(&mut ctx, page).unwrap()
    };
    let root = target.register(dict(&[("Type", Object::name("Catalog"))]));
    target.set_root(root);

    let mut buf = Vec::new();
    target.save_to(&mut buf, SaveMode::Standard).unwrap();

    let mut reloaded = Document::from_bytes(buf).unwrap();
    let r = reloaded.reference(cloned.number).unwrap();
    let clone = reloaded.resolve(r).unwrap();
    assert!(clone.as_dict().unwrap().contains_key("MediaBox"));
}
