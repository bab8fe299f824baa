//! Einsum - Labelled Tensor Contraction
//!
//! Evaluates explicit-output subscripts such as `"...a,...b,abc->...c"`.
//! Letters `a-z` and `A-Z` name dimensions, `...` stands for the leading
//! dimensions an operand does not name. Size-1 dimensions broadcast against
//! larger ones, repeated labels within one operand take the diagonal, and
//! labels missing from the output are summed.
//!
//! A parsed [`EinsumPlan`] also evaluates the adjoint for any operand, which
//! is what the autograd crate uses for the backward pass.
//!
//! @version 0.1.0
//! @author Lamina Development Team

use lamina_core::error::{Error, Result};

use crate::shape::{numel, unravel_index};
use crate::tensor::Tensor;

/// Label id offset for ellipsis dimensions (letters use their char code).
const ELLIPSIS_BASE: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Ellipsis,
    Label(char),
}

fn parse_term(spec: &str, term: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = term.chars().filter(|c| !c.is_whitespace()).collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '.' => {
                if chars.get(i + 1) != Some(&'.') || chars.get(i + 2) != Some(&'.') {
                    return Err(Error::einsum(spec, "'.' must appear as '...'"));
                }
                if tokens.contains(&Token::Ellipsis) {
                    return Err(Error::einsum(spec, "more than one '...' in a term"));
                }
                tokens.push(Token::Ellipsis);
                i += 3;
            }
            c if c.is_ascii_alphabetic() => {
                tokens.push(Token::Label(c));
                i += 1;
            }
            c => return Err(Error::einsum(spec, format!("unexpected character '{c}'"))),
        }
    }
    Ok(tokens)
}

// =============================================================================
// EinsumPlan
// =============================================================================

/// A parsed einsum expression bound to concrete operand shapes.
#[derive(Debug, Clone)]
pub struct EinsumPlan {
    spec: String,
    /// Size of every label slot.
    sizes: Vec<usize>,
    /// Slots of the output dimensions, in output order.
    output_slots: Vec<usize>,
    /// Slots summed away.
    contracted_slots: Vec<usize>,
    /// Per operand, the stride contributed by each slot.
    strides: Vec<Vec<usize>>,
    operand_shapes: Vec<Vec<usize>>,
    output_shape: Vec<usize>,
}

impl EinsumPlan {
    /// Parses `spec` for operands of the given shapes.
    pub fn new(spec: &str, shapes: &[&[usize]]) -> Result<Self> {
        let (lhs, rhs) = spec
            .split_once("->")
            .ok_or_else(|| Error::einsum(spec, "an explicit '->' output is required"))?;

        let input_terms: Vec<Vec<Token>> = lhs
            .split(',')
            .map(|t| parse_term(spec, t))
            .collect::<Result<_>>()?;
        let output_term = parse_term(spec, rhs)?;

        if input_terms.len() != shapes.len() {
            return Err(Error::einsum(
                spec,
                format!(
                    "{} operand terms but {} operands",
                    input_terms.len(),
                    shapes.len()
                ),
            ));
        }

        // Resolve the ellipsis rank of every operand.
        let mut ellipsis_ranks = Vec::with_capacity(shapes.len());
        for (term, shape) in input_terms.iter().zip(shapes) {
            let named = term.iter().filter(|t| matches!(t, Token::Label(_))).count();
            let has_ellipsis = term.contains(&Token::Ellipsis);
            if named > shape.len() || (!has_ellipsis && named != shape.len()) {
                return Err(Error::einsum(
                    spec,
                    format!("term of {named} labels does not fit operand of shape {shape:?}"),
                ));
            }
            ellipsis_ranks.push(shape.len() - named);
        }
        let ellipsis_rank = ellipsis_ranks.iter().copied().max().unwrap_or(0);

        // Assign slots and sizes.
        let mut label_ids: Vec<usize> = Vec::new();
        let mut sizes: Vec<usize> = Vec::new();
        let slot_of = |id: usize, label_ids: &mut Vec<usize>, sizes: &mut Vec<usize>| {
            if let Some(pos) = label_ids.iter().position(|&l| l == id) {
                pos
            } else {
                label_ids.push(id);
                sizes.push(1);
                label_ids.len() - 1
            }
        };

        let mut operand_slots: Vec<Vec<usize>> = Vec::with_capacity(shapes.len());
        for ((term, shape), &rank) in input_terms.iter().zip(shapes).zip(&ellipsis_ranks) {
            let mut slots = Vec::with_capacity(shape.len());
            for token in term {
                match token {
                    Token::Ellipsis => {
                        for k in (ellipsis_rank - rank)..ellipsis_rank {
                            slots.push(slot_of(ELLIPSIS_BASE + k, &mut label_ids, &mut sizes));
                        }
                    }
                    Token::Label(c) => {
                        slots.push(slot_of(*c as usize, &mut label_ids, &mut sizes));
                    }
                }
            }
            for (&slot, &dim) in slots.iter().zip(shape.iter()) {
                let current = sizes[slot];
                if current == 1 {
                    sizes[slot] = dim;
                } else if dim != 1 && dim != current {
                    return Err(Error::einsum(
                        spec,
                        format!("dimension size mismatch: {current} vs {dim}"),
                    ));
                }
            }
            operand_slots.push(slots);
        }

        let mut output_slots = Vec::new();
        for token in &output_term {
            let ids: Vec<usize> = match token {
                Token::Ellipsis => (0..ellipsis_rank).map(|k| ELLIPSIS_BASE + k).collect(),
                Token::Label(c) => vec![*c as usize],
            };
            for id in ids {
                let slot = label_ids.iter().position(|&l| l == id).ok_or_else(|| {
                    Error::einsum(spec, "output label does not appear in any operand")
                })?;
                if output_slots.contains(&slot) {
                    return Err(Error::einsum(spec, "output label repeated"));
                }
                output_slots.push(slot);
            }
        }
        let contracted_slots: Vec<usize> =
            (0..label_ids.len()).filter(|s| !output_slots.contains(s)).collect();

        // Per-operand strides; broadcast (size-1) dimensions contribute zero.
        let mut strides = Vec::with_capacity(shapes.len());
        for (slots, shape) in operand_slots.iter().zip(shapes) {
            let own = crate::shape::contiguous_strides(shape);
            let mut per_slot = vec![0usize; label_ids.len()];
            for (d, &slot) in slots.iter().enumerate() {
                if shape[d] != 1 || sizes[slot] == 1 {
                    per_slot[slot] += own[d];
                }
            }
            strides.push(per_slot);
        }

        let output_shape = output_slots.iter().map(|&s| sizes[s]).collect();
        Ok(Self {
            spec: spec.to_string(),
            sizes,
            output_slots,
            contracted_slots,
            strides,
            operand_shapes: shapes.iter().map(|s| s.to_vec()).collect(),
            output_shape,
        })
    }

    /// Returns the subscript string.
    pub fn spec(&self) -> &str {
        &self.spec
    }

    /// Returns the output shape.
    pub fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    /// Visits every (output index, operand offsets) combination.
    fn for_each<F: FnMut(usize, &[usize])>(&self, mut f: F) {
        let contracted_shape: Vec<usize> =
            self.contracted_slots.iter().map(|&s| self.sizes[s]).collect();
        let contracted_total = numel(&contracted_shape);
        let mut index = vec![0usize; self.sizes.len()];
        let mut offsets = vec![0usize; self.strides.len()];

        for out in 0..numel(&self.output_shape) {
            for (slot, v) in self
                .output_slots
                .iter()
                .zip(unravel_index(out, &self.output_shape))
            {
                index[*slot] = v;
            }
            for c in 0..contracted_total {
                for (slot, v) in self
                    .contracted_slots
                    .iter()
                    .zip(unravel_index(c, &contracted_shape))
                {
                    index[*slot] = v;
                }
                for (op, stride) in self.strides.iter().enumerate() {
                    offsets[op] = index.iter().zip(stride).map(|(i, s)| i * s).sum();
                }
                f(out, &offsets);
            }
        }
    }

    fn check_operands(&self, operands: &[&Tensor]) -> Result<()> {
        if operands.len() != self.operand_shapes.len() {
            return Err(Error::einsum(&self.spec, "wrong number of operands"));
        }
        for (t, expected) in operands.iter().zip(&self.operand_shapes) {
            if t.shape() != expected.as_slice() {
                return Err(Error::shape_mismatch(expected, t.shape()));
            }
        }
        Ok(())
    }

    /// Evaluates the contraction.
    pub fn forward(&self, operands: &[&Tensor]) -> Result<Tensor> {
        self.check_operands(operands)?;
        let mut out = vec![0.0f32; numel(&self.output_shape)];
        self.for_each(|o, offsets| {
            let mut prod = 1.0f32;
            for (t, &off) in operands.iter().zip(offsets) {
                prod *= t.as_slice()[off];
            }
            out[o] += prod;
        });
        Ok(Tensor::from_parts(out, &self.output_shape))
    }

    /// Gradient of the contraction with respect to operand `k`, given the
    /// gradient of the output.
    pub fn operand_grad(&self, operands: &[&Tensor], grad_output: &Tensor, k: usize) -> Result<Tensor> {
        self.check_operands(operands)?;
        if grad_output.shape() != self.output_shape.as_slice() {
            return Err(Error::shape_mismatch(&self.output_shape, grad_output.shape()));
        }
        let shape = &self.operand_shapes[k];
        let mut grad = vec![0.0f32; numel(shape)];
        let g = grad_output.as_slice();
        self.for_each(|o, offsets| {
            let mut prod = g[o];
            for (j, (t, &off)) in operands.iter().zip(offsets).enumerate() {
                if j != k {
                    prod *= t.as_slice()[off];
                }
            }
            grad[offsets[k]] += prod;
        });
        Ok(Tensor::from_parts(grad, shape))
    }
}

/// Evaluates `spec` over `operands`.
pub fn einsum(spec: &str, operands: &[&Tensor]) -> Result<Tensor> {
    let shapes: Vec<&[usize]> = operands.iter().map(|t| t.shape()).collect();
    EinsumPlan::new(spec, &shapes)?.forward(operands)
}

// =============================================================================
// Tests
// =============================================================================
