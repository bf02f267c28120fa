//! Portfolio PDF packs labeled image segments into a single PDF document, and recovers the exact
//! segments from that same document later on without keeping any state besides the PDF itself.
//!
//! The document carries a manifest in its metadata which describes every segment and where each
//! of its images was painted. Loading a document reads the manifest back, extracts the painted
//! images in order and maps them back to their segments, reporting anything that could not be
//! recovered instead of failing.
//!
//! The entry points are `portfolio::save_to_pdf` and `portfolio::load_from_pdf`, which work on a
//! `workspace::Workspace`.
#![warn(clippy::unwrap_used)]

/// The module where the `Workspace` holding the student name and the images of every segment is
/// presented, together with the `Segment` and the per-image metadata the save flow relies upon.
pub mod workspace;

/// Normalization of the images to the canonical encoding, an RGB JPEG bounded in size.
///
/// Images restored from a save are flagged as already compressed and are never re-encoded, so
/// that repeated saves do not keep degrading them.
pub mod compression;

/// The manifest embedded in the keywords of the document, and its printable encoding.
///
/// # Format
///
/// The manifest is a JSON object with the student name, the number of images of every segment,
/// the alias of every image and the placement it was painted at. It is written in the keywords
/// as `PPRDATA:` followed by the Base64 encoding of the UTF-8 JSON text. Validation is permissive
/// so that older saves lacking the aliases or the placements still load.
pub mod manifest;

/// The document writer, a state machine laying out the labels and the images of every segment
/// on a `DocumentCanvas`.
pub mod layout;

/// The module where the `PdfDocument` interface for writing PDF documents is presented. It
/// implements the `DocumentCanvas` on top of `lopdf`.
///
/// # Introduction
///
/// The main component of this module is the struct `PdfDocument`. Pages are collected in memory
/// while the writer draws on them, JPEG images are embedded as they are while any other format is
/// decoded and embedded as raw samples. The labels are written with the standard Helvetica font,
/// so that no font program needs to be embedded. Finally `save_to_bytes` writes the document
/// information dictionary, the catalog and the page tree before serializing everything.
pub mod pdf;

/// The document reader: the manifest and the images painted in a document, found through the
/// `EmbeddedImageSource` interface.
pub mod reader;

pub mod reconstruct;

pub mod report;

/// The JSON save format, where images are kept as data URLs.
pub mod json_save;

/// The save and load flows.
pub mod portfolio;

pub mod configuration;

/// This module contains the error types used throughout this library.
///
/// `ContextError` is used by the PDF plumbing and the configuration loading: it carries an
/// explanation and, if an error was propagated from a function called inside this library, the
/// message of that error. The errors of single images are structured instead, as they are
/// turned into records of skipped images rather than being propagated. `LoadError` is the only
/// fatal error of the load flow.
pub mod error;
