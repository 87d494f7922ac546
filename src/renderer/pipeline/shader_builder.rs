//! Shader Builder
//!
//! Expands a shader blueprint template into final shader source for one
//! [`ShaderProperties`] combination.
//!
//! # Directives
//!
//! | Stage | Directives | Effect |
//! |-------|-----------|--------|
//! | 1. math | `@set(p, e)` `@add` `@sub` `@mul` `@div` `@mod` `@min` `@max` | update the working property `p`, emit nothing |
//! |         | `@eval(e)` | emit the value of `e` |
//! | 2. counter | `@counter(p)` / `@value(p)` | emit `p` (and increment it for `@counter`) |
//! | 3. foreach | `@foreach(count, var[, start]) … @end` | unroll, `@var` becomes the index |
//! | 4. property | `@property(cond) … [@else …] @end` | keep one branch |
//! | 5. collect | `@piece(name) … @end` | register the piece, remove it from the text |
//! | 6. insert | `@insertpiece(name)` | substitute the piece (pieces may insert pieces) |
//!
//! Each stage consumes the text produced by the previous one. Included shader
//! pieces run through stages 1–5 first (in include order), then the blueprint
//! itself, then dynamic pieces are registered (overriding static ones), and
//! finally stage 6 runs on the blueprint text. Since collection completes
//! before insertion, a piece can be inserted above its declaration.
//!
//! Any `@word` that is not a directive (WGSL attributes such as `@location`)
//! is copied through untouched.

use std::mem;

use rustc_hash::FxHashMap;

use super::shader_expression::{
    evaluate, is_identifier_char, is_identifier_start, referenced_identifiers, to_property_value,
};
use crate::errors::{PipelineError, Result};
use crate::resources::{
    DynamicShaderPieces, ShaderAssetLibrary, ShaderBlueprintResource, ShaderProperties,
};
use crate::utils::hash::{FNV1A64_INITIAL_HASH, fnv1a64_u64};
use crate::utils::{AssetId, ShaderPieceId, ShaderPropertyId, StringId};

/// Insertion passes before `@insertpiece` chains are considered recursive.
pub const MAX_PIECE_INSERTION_DEPTH: usize = 16;

/// Iterations a single `@foreach` may unroll.
pub const MAX_FOREACH_ITERATIONS: i64 = 4096;

const MATH_DIRECTIVES: &[&str] = &["set", "add", "sub", "mul", "div", "mod", "min", "max", "eval"];
const COUNTER_DIRECTIVES: &[&str] = &["counter", "value"];
const BLOCK_DIRECTIVES: &[&str] = &["property", "foreach", "piece", "else", "end"];
const ALL_DIRECTIVES: &[&str] = &[
    "set", "add", "sub", "mul", "div", "mod", "min", "max", "eval", "counter", "value", "foreach",
    "property", "else", "end", "piece", "insertpiece",
];

type StageResult<T> = std::result::Result<T, String>;

/// Result of [`ShaderBuilder::create_source_code`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildShader {
    pub source_code: String,
    /// Included shader pieces in include order, then the shader blueprint.
    pub asset_ids: Vec<AssetId>,
    /// FNV-1a64 fold of the file hashes of `asset_ids`.
    pub combined_asset_file_hashes: u64,
}

/// Reusable per-thread builder state; one instance lives on each thread
/// that generates source (builder thread, synchronous callers).
#[derive(Default)]
pub struct ShaderBuilder {
    properties: ShaderProperties,
    pieces: FxHashMap<ShaderPieceId, String>,
    scratch: (String, String),
}

impl ShaderBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_source_code(
        &mut self,
        library: &ShaderAssetLibrary,
        shader_blueprint: &ShaderBlueprintResource,
        shader_properties: &ShaderProperties,
        dynamic_shader_pieces: &DynamicShaderPieces,
    ) -> Result<BuildShader> {
        self.properties.clear();
        self.properties.merge(shader_properties);
        self.pieces.clear();

        let mut asset_ids =
            Vec::with_capacity(shader_blueprint.included_shader_pieces().len() + 1);
        let mut combined_asset_file_hashes = FNV1A64_INITIAL_HASH;

        for &piece_id in shader_blueprint.included_shader_pieces() {
            let piece = library
                .get_shader_piece(piece_id)
                .ok_or(PipelineError::AssetNotFound(piece_id))?;
            // Everything outside `@piece` blocks of a piece file is dropped.
            self.process(piece.name(), piece.source_code())?;
            asset_ids.push(piece_id);
            combined_asset_file_hashes = fnv1a64_u64(piece.file_hash(), combined_asset_file_hashes);
        }

        let main = self.process(shader_blueprint.name(), shader_blueprint.source_code())?;
        asset_ids.push(shader_blueprint.asset_id());
        combined_asset_file_hashes =
            fnv1a64_u64(shader_blueprint.file_hash(), combined_asset_file_hashes);

        for (piece_id, source_code) in dynamic_shader_pieces.iter() {
            self.pieces.insert(piece_id, source_code.to_string());
        }

        let source_code = insert_pieces(&self.pieces, &main).map_err(|message| {
            PipelineError::ShaderBuild {
                asset: shader_blueprint.name().to_string(),
                message,
            }
        })?;

        Ok(BuildShader {
            source_code,
            asset_ids,
            combined_asset_file_hashes,
        })
    }

    /// Runs stages 1–5 on one asset and returns the remaining text.
    fn process(&mut self, asset: &str, source_code: &str) -> Result<String> {
        let (mut a, mut b) = mem::take(&mut self.scratch);
        a.clear();
        b.clear();

        let result = (|| -> StageResult<String> {
            parse_math(&mut self.properties, source_code, &mut a)?;
            parse_counter(&mut self.properties, &a, &mut b)?;
            a.clear();
            parse_for_each(&self.properties, &b, &mut a)?;
            b.clear();
            parse_properties(&self.properties, &a, &mut b)?;
            a.clear();
            collect_pieces(&mut self.pieces, &b, &mut a)?;
            Ok(a.clone())
        })();

        self.scratch = (a, b);
        result.map_err(|message| PipelineError::ShaderBuild {
            asset: asset.to_string(),
            message,
        })
    }
}

/// Property ids read by any directive in `source_code`.
///
/// Loop variables and piece names are not properties and are skipped.
#[must_use]
pub fn collect_referenced_properties(source_code: &str) -> Vec<ShaderPropertyId> {
    let mut referenced = Vec::new();
    let mut cursor = 0;

    while let Some(directive) = next_directive(source_code, cursor, ALL_DIRECTIVES) {
        cursor = directive.name_end;
        let Ok((arguments, end)) = parse_arguments(source_code, &directive) else {
            continue;
        };
        cursor = end;

        let arguments = split_arguments(arguments);
        let expressions: Vec<&str> = match directive.name {
            "piece" | "insertpiece" | "else" | "end" => Vec::new(),
            // count and start; the loop variable is not a property
            "foreach" => arguments
                .iter()
                .enumerate()
                .filter_map(|(i, a)| (i != 1).then_some(*a))
                .collect(),
            _ => arguments,
        };
        for expression in expressions {
            referenced.extend(referenced_identifiers(expression).into_iter().map(StringId::new));
        }
    }

    referenced.sort_unstable();
    referenced.dedup();
    referenced
}

// ─── Directive Scanning ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Directive<'a> {
    /// Byte offset of the `@`.
    start: usize,
    name: &'a str,
    name_end: usize,
}

fn next_directive<'a>(text: &'a str, from: usize, names: &[&str]) -> Option<Directive<'a>> {
    let bytes = text.as_bytes();
    let mut i = from;
    while let Some(offset) = text[i..].find('@') {
        let start = i + offset;
        let mut end = start + 1;
        if end < bytes.len() && is_identifier_start(bytes[end]) {
            while end < bytes.len() && is_identifier_char(bytes[end]) {
                end += 1;
            }
            let name = &text[start + 1..end];
            if names.contains(&name) {
                return Some(Directive {
                    start,
                    name,
                    name_end: end,
                });
            }
        }
        i = end;
    }
    None
}

/// Returns the text between the parentheses following a directive name and
/// the offset just past `)`.
fn parse_arguments<'a>(text: &'a str, directive: &Directive<'_>) -> StageResult<(&'a str, usize)> {
    let bytes = text.as_bytes();
    if bytes.get(directive.name_end) != Some(&b'(') {
        return Err(format!("expected '(' after @{}", directive.name));
    }

    let mut depth = 0usize;
    for (i, &c) in bytes.iter().enumerate().skip(directive.name_end) {
        match c {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&text[directive.name_end + 1..i], i + 1));
                }
            }
            _ => {}
        }
    }
    Err(format!("unterminated argument list of @{}", directive.name))
}

fn split_arguments(arguments: &str) -> Vec<&str> {
    let mut result = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in arguments.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                result.push(arguments[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    result.push(arguments[start..].trim());
    result
}

fn expect_arguments<'a>(
    text: &'a str,
    directive: &Directive<'_>,
    count: std::ops::RangeInclusive<usize>,
) -> StageResult<(Vec<&'a str>, usize)> {
    let (arguments, end) = parse_arguments(text, directive)?;
    let arguments = split_arguments(arguments);
    if !count.contains(&arguments.len()) || arguments.iter().any(|a| a.is_empty()) {
        return Err(format!(
            "@{} takes {} argument(s), got '{}'",
            directive.name,
            if count.start() == count.end() {
                count.start().to_string()
            } else {
                format!("{}-{}", count.start(), count.end())
            },
            arguments.join(", ")
        ));
    }
    Ok((arguments, end))
}

fn expect_identifier<'a>(directive: &Directive<'_>, argument: &'a str) -> StageResult<&'a str> {
    let bytes = argument.as_bytes();
    if bytes.first().is_some_and(|&c| is_identifier_start(c))
        && bytes.iter().all(|&c| is_identifier_char(c))
    {
        Ok(argument)
    } else {
        Err(format!("@{} expects a name, got '{argument}'", directive.name))
    }
}

/// Bounds of a block opened right before `from`.
#[derive(Debug, Clone, Copy)]
struct Block {
    /// `(start of @else, end of @else)`
    else_range: Option<(usize, usize)>,
    end_start: usize,
    end_end: usize,
}

fn find_block_end(text: &str, from: usize, opener: &str) -> StageResult<Block> {
    let mut depth = 0usize;
    let mut else_range = None;
    let mut cursor = from;

    while let Some(directive) = next_directive(text, cursor, BLOCK_DIRECTIVES) {
        cursor = directive.name_end;
        match directive.name {
            "end" if depth == 0 => {
                return Ok(Block {
                    else_range,
                    end_start: directive.start,
                    end_end: directive.name_end,
                });
            }
            "end" => depth -= 1,
            "else" if depth == 0 => {
                if else_range.is_some() {
                    return Err(format!("more than one @else in @{opener} block"));
                }
                else_range = Some((directive.start, directive.name_end));
            }
            "else" => {}
            _ => depth += 1,
        }
    }
    Err(format!("unterminated @{opener} block (missing @end)"))
}

// ─── Stage 1: Math ───────────────────────────────────────────────────────────

fn parse_math(properties: &mut ShaderProperties, text: &str, out: &mut String) -> StageResult<()> {
    let mut cursor = 0;
    while let Some(directive) = next_directive(text, cursor, MATH_DIRECTIVES) {
        out.push_str(&text[cursor..directive.start]);

        if directive.name == "eval" {
            let (arguments, end) = expect_arguments(text, &directive, 1..=1)?;
            let value = evaluate(arguments[0], properties)?;
            out.push_str(&value.to_string());
            cursor = end;
            continue;
        }

        let (arguments, end) = expect_arguments(text, &directive, 2..=2)?;
        let id = StringId::new(expect_identifier(&directive, arguments[0])?);
        let operand = evaluate(arguments[1], properties)?;
        let current = i64::from(properties.get_property_value_or(id, 0));

        let value = match directive.name {
            "set" => operand,
            "add" => current.wrapping_add(operand),
            "sub" => current.wrapping_sub(operand),
            "mul" => current.wrapping_mul(operand),
            "div" | "mod" if operand == 0 => {
                return Err(format!("division by zero in @{}", directive.name));
            }
            "div" => current.wrapping_div(operand),
            "mod" => current.wrapping_rem(operand),
            "min" => current.min(operand),
            _ => current.max(operand),
        };
        properties.set_property_value(id, to_property_value(value));
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    Ok(())
}

// ─── Stage 2: Counter ────────────────────────────────────────────────────────

fn parse_counter(properties: &mut ShaderProperties, text: &str, out: &mut String) -> StageResult<()> {
    let mut cursor = 0;
    while let Some(directive) = next_directive(text, cursor, COUNTER_DIRECTIVES) {
        out.push_str(&text[cursor..directive.start]);

        let (arguments, end) = expect_arguments(text, &directive, 1..=1)?;
        let id = StringId::new(expect_identifier(&directive, arguments[0])?);
        let value = properties.get_property_value_or(id, 0);
        out.push_str(&value.to_string());
        if directive.name == "counter" {
            properties.set_property_value(id, value.wrapping_add(1));
        }
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    Ok(())
}

// ─── Stage 3: Foreach ────────────────────────────────────────────────────────

fn parse_for_each(properties: &ShaderProperties, text: &str, out: &mut String) -> StageResult<()> {
    let mut cursor = 0;
    while let Some(directive) = next_directive(text, cursor, &["foreach"]) {
        out.push_str(&text[cursor..directive.start]);

        let (arguments, body_start) = expect_arguments(text, &directive, 2..=3)?;
        let count = evaluate(arguments[0], properties)?;
        let variable = expect_identifier(&directive, arguments[1])?;
        if ALL_DIRECTIVES.contains(&variable) {
            return Err(format!("@foreach variable '{variable}' shadows a directive"));
        }
        let start = match arguments.get(2) {
            Some(start) => evaluate(start, properties)?,
            None => 0,
        };

        let block = find_block_end(text, body_start, "foreach")?;
        if block.else_range.is_some() {
            return Err("@else is only allowed in @property blocks".to_string());
        }
        let body = &text[body_start..block.end_start];

        if count.saturating_sub(start) > MAX_FOREACH_ITERATIONS {
            return Err(format!(
                "@foreach unrolls {} iterations, more than {MAX_FOREACH_ITERATIONS}",
                count.saturating_sub(start)
            ));
        }
        for index in start..count {
            let unrolled = replace_loop_variable(body, variable, index);
            parse_for_each(properties, &unrolled, out)?;
        }
        cursor = block.end_end;
    }
    out.push_str(&text[cursor..]);
    Ok(())
}

fn replace_loop_variable(body: &str, variable: &str, index: i64) -> String {
    let mut result = String::with_capacity(body.len());
    let mut cursor = 0;
    while let Some(directive) = next_directive(body, cursor, &[variable]) {
        result.push_str(&body[cursor..directive.start]);
        result.push_str(&index.to_string());
        cursor = directive.name_end;
    }
    result.push_str(&body[cursor..]);
    result
}

// ─── Stage 4: Properties ─────────────────────────────────────────────────────

fn parse_properties(properties: &ShaderProperties, text: &str, out: &mut String) -> StageResult<()> {
    let mut cursor = 0;
    while let Some(directive) = next_directive(text, cursor, BLOCK_DIRECTIVES) {
        out.push_str(&text[cursor..directive.start]);

        match directive.name {
            "property" => {
                let (arguments, body_start) = expect_arguments(text, &directive, 1..=1)?;
                let condition = evaluate(arguments[0], properties)? != 0;
                let block = find_block_end(text, body_start, "property")?;

                let branch = match (condition, block.else_range) {
                    (true, Some((else_start, _))) => &text[body_start..else_start],
                    (true, None) => &text[body_start..block.end_start],
                    (false, Some((_, else_end))) => &text[else_end..block.end_start],
                    (false, None) => "",
                };
                parse_properties(properties, branch, out)?;
                cursor = block.end_end;
            }
            "piece" => {
                // Kept for the collect stage; only the body is resolved here.
                let (_, body_start) = parse_arguments(text, &directive)?;
                let block = find_block_end(text, body_start, "piece")?;
                if block.else_range.is_some() {
                    return Err("@else is only allowed in @property blocks".to_string());
                }
                out.push_str(&text[directive.start..body_start]);
                parse_properties(properties, &text[body_start..block.end_start], out)?;
                out.push_str("@end");
                cursor = block.end_end;
            }
            "foreach" => return Err("@foreach survived unrolling".to_string()),
            other => return Err(format!("@{other} without matching block")),
        }
    }
    out.push_str(&text[cursor..]);
    Ok(())
}

// ─── Stage 5: Collect Pieces ─────────────────────────────────────────────────

fn collect_pieces(
    pieces: &mut FxHashMap<ShaderPieceId, String>,
    text: &str,
    out: &mut String,
) -> StageResult<()> {
    let mut cursor = 0;
    while let Some(directive) = next_directive(text, cursor, &["piece"]) {
        out.push_str(&text[cursor..directive.start]);

        let (arguments, body_start) = expect_arguments(text, &directive, 1..=1)?;
        let name = expect_identifier(&directive, arguments[0])?;
        let block = find_block_end(text, body_start, "piece")?;
        let body = &text[body_start..block.end_start];
        if next_directive(body, 0, &["piece"]).is_some() {
            return Err(format!("@piece({name}) contains a nested @piece"));
        }

        if pieces.insert(StringId::new(name), body.to_string()).is_some() {
            return Err(format!("@piece({name}) is defined more than once"));
        }
        cursor = block.end_end;
    }
    out.push_str(&text[cursor..]);
    Ok(())
}

// ─── Stage 6: Insert Pieces ──────────────────────────────────────────────────

fn insert_pieces(pieces: &FxHashMap<ShaderPieceId, String>, text: &str) -> StageResult<String> {
    let mut current = text.to_string();

    for depth in 0..=MAX_PIECE_INSERTION_DEPTH {
        if next_directive(&current, 0, &["insertpiece"]).is_none() {
            return Ok(current);
        }
        if depth == MAX_PIECE_INSERTION_DEPTH {
            break;
        }

        let mut out = String::with_capacity(current.len());
        let mut cursor = 0;
        while let Some(directive) = next_directive(&current, cursor, &["insertpiece"]) {
            out.push_str(&current[cursor..directive.start]);
            let (arguments, end) = expect_arguments(&current, &directive, 1..=1)?;
            let name = expect_identifier(&directive, arguments[0])?;
            let piece = pieces
                .get(&StringId::new(name))
                .ok_or_else(|| format!("@insertpiece({name}) references an unknown piece"))?;
            out.push_str(piece);
            cursor = end;
        }
        out.push_str(&current[cursor..]);
        current = out;
    }

    Err(format!(
        "@insertpiece nesting exceeds {MAX_PIECE_INSERTION_DEPTH} levels (recursive piece?)"
    ))
}
