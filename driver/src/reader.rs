//! Reader for the textual module format exchanged with the front-end.
//!
//! The format is line-oriented; `#` starts a comment. Types are written
//! without embedded spaces (`ptr<i32>`, `fn(i32,i32)->(i32)`). A function
//! body is a list of numbered blocks; `block 0` is the entry successor.
//! Instructions have the shape `res : ty, ... = op operand, ...`; block
//! terminators are `jump N`, `branch v, N0, N1, ...` (successor `i` taken
//! on control alternative `i`), or the function's single `return v, ...`.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use rvopt_ir::{
    BinaryKind, ConstantValue, DataDef, FunctionDef, FunctionType, Import, IrError, Linkage,
    MatchMapping, Module, Operation, Type, UnaryKind,
    cfg::{CfgNode, ControlFlowGraph},
    tac::{BasicBlock, Tac, Variable, VariableTable},
};

pub fn parse_module(text: &str) -> Result<Module, IrError> {
    Parser::new(text).module()
}

fn invalid(line: usize, message: impl std::fmt::Display) -> IrError {
    IrError::InvalidInput(format!("line {line}: {message}"))
}

struct Parser<'a> {
    lines: Vec<(usize, &'a str)>,
    position: usize,
    /// Module-level symbol table: name -> type.
    symbols: FxHashMap<String, Type>,
}

enum Terminator {
    Jump(u32),
    Branch(Vec<u32>),
    Return(Vec<Variable>),
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        let lines = text
            .lines()
            .enumerate()
            .map(|(number, line)| {
                let line = line.split('#').next().unwrap_or("").trim();
                (number + 1, line)
            })
            .filter(|(_, line)| !line.is_empty())
            .collect();
        Self {
            lines,
            position: 0,
            symbols: FxHashMap::default(),
        }
    }

    fn peek(&self) -> Option<(usize, &'a str)> {
        self.lines.get(self.position).copied()
    }

    fn next_line(&mut self) -> Option<(usize, &'a str)> {
        let line = self.peek();
        if line.is_some() {
            self.position += 1;
        }
        line
    }

    fn module(&mut self) -> Result<Module, IrError> {
        let mut module = Module::default();
        while let Some((number, line)) = self.next_line() {
            let mut words = line.split_whitespace();
            match words.next() {
                Some("module") => {
                    module.name = words
                        .next()
                        .ok_or_else(|| invalid(number, "missing module name"))?
                        .to_string();
                }
                Some("import") => {
                    let import = self.import(number, line)?;
                    self.symbols.insert(import.name.clone(), import.ty.clone());
                    module.imports.push(import);
                }
                Some("data") => {
                    let data = self.data(number, line)?;
                    self.symbols
                        .insert(data.name.clone(), Type::pointer(data.ty.clone()));
                    module.data.push(data);
                }
                Some("function") => {
                    let function = self.function(number, line)?;
                    self.symbols.insert(
                        function.name.clone(),
                        Type::Function(function.signature.clone()),
                    );
                    module.functions.push(function);
                }
                _ => return Err(invalid(number, format!("unexpected line '{line}'"))),
            }
        }
        Ok(module)
    }

    // import @x : i32 external
    fn import(&mut self, number: usize, line: &str) -> Result<Import, IrError> {
        let rest = line.strip_prefix("import").unwrap().trim();
        let (name, rest) = rest
            .split_once(':')
            .ok_or_else(|| invalid(number, "expected 'import @name : type linkage'"))?;
        let name = parse_symbol(number, name.trim())?;
        let mut words = rest.split_whitespace();
        let ty = parse_type(
            number,
            words.next().ok_or_else(|| invalid(number, "missing type"))?,
        )?;
        let linkage = parse_linkage(
            number,
            words.next().ok_or_else(|| invalid(number, "missing linkage"))?,
        )?;
        Ok(Import { name, ty, linkage })
    }

    // data @d : i32 external constant {
    fn data(&mut self, number: usize, line: &str) -> Result<DataDef, IrError> {
        let rest = line.strip_prefix("data").unwrap().trim();
        let rest = rest
            .strip_suffix('{')
            .ok_or_else(|| invalid(number, "expected '{' after data header"))?
            .trim();
        let (name, rest) = rest
            .split_once(':')
            .ok_or_else(|| invalid(number, "expected 'data @name : type ...'"))?;
        let name = parse_symbol(number, name.trim())?;
        let mut words = rest.split_whitespace();
        let ty = parse_type(
            number,
            words.next().ok_or_else(|| invalid(number, "missing type"))?,
        )?;
        let linkage = parse_linkage(
            number,
            words.next().ok_or_else(|| invalid(number, "missing linkage"))?,
        )?;
        let constant = match words.next() {
            Some("constant") => true,
            None => false,
            Some(other) => return Err(invalid(number, format!("unexpected '{other}'"))),
        };

        let mut variables = VariableTable::new();
        let mut names: FxHashMap<String, Variable> = FxHashMap::default();
        let mut block = BasicBlock::new();
        let mut result = None;
        loop {
            let (number, line) = self
                .next_line()
                .ok_or_else(|| invalid(number, "unterminated data body"))?;
            if line == "}" {
                break;
            }
            if let Some(rest) = line.strip_prefix("return") {
                let variable = self.variable(number, rest.trim(), &mut variables, &mut names)?;
                result = Some(variable);
                continue;
            }
            let tac = self.instruction(number, line, &mut variables, &mut names)?;
            block.append(tac);
        }
        let result =
            result.ok_or_else(|| invalid(number, "data body must return its initializer"))?;

        let mut cfg = ControlFlowGraph::new(Vec::new(), vec![result], variables);
        let body = cfg.add_block(block);
        let entry = cfg.entry();
        let exit = cfg.exit();
        cfg.connect(entry, body);
        cfg.connect(body, exit);
        Ok(DataDef {
            name,
            ty,
            linkage,
            constant,
            initializer: cfg,
        })
    }

    // function @f(a : i32, b : i32) -> (i32) external {
    fn function(&mut self, number: usize, line: &str) -> Result<FunctionDef, IrError> {
        let rest = line.strip_prefix("function").unwrap().trim();
        let rest = rest
            .strip_suffix('{')
            .ok_or_else(|| invalid(number, "expected '{' after function header"))?
            .trim();
        let open = rest
            .find('(')
            .ok_or_else(|| invalid(number, "missing parameter list"))?;
        let name = parse_symbol(number, rest[..open].trim())?;
        let close = rest
            .find(')')
            .ok_or_else(|| invalid(number, "unterminated parameter list"))?;
        let params_text = &rest[open + 1..close];
        let rest = rest[close + 1..].trim();
        let rest = rest
            .strip_prefix("->")
            .ok_or_else(|| invalid(number, "missing '->' in function header"))?
            .trim();
        let close = rest
            .find(')')
            .ok_or_else(|| invalid(number, "unterminated result list"))?;
        let results_text = rest
            .strip_prefix('(')
            .ok_or_else(|| invalid(number, "missing '(' before result list"))?;
        let results_text = &results_text[..close - 1];
        let linkage = parse_linkage(number, rest[close + 1..].trim())?;

        let mut variables = VariableTable::new();
        let mut names: FxHashMap<String, Variable> = FxHashMap::default();
        let mut params = Vec::new();
        for entry in split_list(params_text) {
            let (param, ty) = entry
                .split_once(':')
                .ok_or_else(|| invalid(number, "expected 'name : type' parameter"))?;
            let ty = parse_type(number, ty.trim())?;
            let variable = variables.add(param.trim(), ty);
            names.insert(param.trim().to_string(), variable);
            params.push(variable);
        }
        let result_types: Vec<Type> = split_list(results_text)
            .into_iter()
            .map(|ty| parse_type(number, ty.trim()))
            .collect::<Result<_, _>>()?;
        let param_types: Vec<Type> = params
            .iter()
            .map(|variable| variables.ty(*variable).clone())
            .collect();
        let signature = FunctionType::new(param_types, result_types);

        // Body: numbered blocks with terminators.
        let mut blocks: Vec<(u32, BasicBlock, Terminator, usize)> = Vec::new();
        let mut current: Option<(u32, BasicBlock, usize)> = None;
        let mut returned: Option<Vec<Variable>> = None;
        loop {
            let (number, line) = self
                .next_line()
                .ok_or_else(|| invalid(number, "unterminated function body"))?;
            if line == "}" {
                if current.is_some() {
                    return Err(invalid(number, "block without terminator"));
                }
                break;
            }
            if let Some(rest) = line.strip_prefix("block") {
                if current.is_some() {
                    return Err(invalid(number, "previous block lacks a terminator"));
                }
                let id = rest
                    .trim()
                    .strip_suffix(':')
                    .and_then(|id| id.trim().parse::<u32>().ok())
                    .ok_or_else(|| invalid(number, "expected 'block N:'"))?;
                current = Some((id, BasicBlock::new(), number));
                continue;
            }
            let Some((id, block, started)) = current.take() else {
                return Err(invalid(number, "instruction outside any block"));
            };
            let mut words = line.split_whitespace();
            match words.next() {
                Some("jump") => {
                    let target = words
                        .next()
                        .and_then(|t| t.parse().ok())
                        .ok_or_else(|| invalid(number, "expected 'jump N'"))?;
                    blocks.push((id, block, Terminator::Jump(target), started));
                }
                Some("branch") => {
                    let rest = line.strip_prefix("branch").unwrap().trim();
                    let mut parts = split_list(rest).into_iter();
                    let predicate = parts
                        .next()
                        .ok_or_else(|| invalid(number, "missing branch predicate"))?;
                    let predicate =
                        self.variable(number, predicate.trim(), &mut variables, &mut names)?;
                    let targets: Vec<u32> = parts
                        .map(|t| {
                            t.trim()
                                .parse()
                                .map_err(|_| invalid(number, "bad branch target"))
                        })
                        .collect::<Result<_, _>>()?;
                    if targets.len() < 2 {
                        return Err(invalid(number, "branch needs at least two targets"));
                    }
                    let alternatives = targets.len() as u32;
                    let found = variables.ty(predicate).clone();
                    if found != Type::control(alternatives) {
                        return Err(IrError::TypeMismatch {
                            expected: Type::control(alternatives),
                            found,
                        });
                    }
                    let mut block = block;
                    block.append(Tac::new(
                        Operation::Branch { alternatives },
                        [predicate],
                        [],
                    ));
                    blocks.push((id, block, Terminator::Branch(targets), started));
                }
                Some("return") => {
                    let rest = line.strip_prefix("return").unwrap().trim();
                    let values: Vec<Variable> = split_list(rest)
                        .into_iter()
                        .map(|v| self.variable(number, v.trim(), &mut variables, &mut names))
                        .collect::<Result<_, _>>()?;
                    if returned.is_some() {
                        return Err(invalid(number, "function has more than one return"));
                    }
                    returned = Some(values.clone());
                    blocks.push((id, block, Terminator::Return(values), started));
                }
                _ => {
                    let tac = self.instruction(number, line, &mut variables, &mut names)?;
                    let mut block = block;
                    block.append(tac);
                    current = Some((id, block, started));
                }
            }
        }
        let results =
            returned.ok_or_else(|| invalid(number, "function body has no return"))?;

        let mut cfg = ControlFlowGraph::new(params, results, variables);
        let mut ids: FxHashMap<u32, CfgNode> = FxHashMap::default();
        for (id, block, _, started) in &blocks {
            if ids
                .insert(*id, cfg.add_block(block.clone()))
                .is_some()
            {
                return Err(invalid(*started, format!("duplicate block {id}")));
            }
        }
        let lookup = |line: usize, id: u32, ids: &FxHashMap<u32, CfgNode>| {
            ids.get(&id)
                .copied()
                .ok_or_else(|| invalid(line, format!("undefined block {id}")))
        };
        let entry = cfg.entry();
        let exit = cfg.exit();
        cfg.connect(entry, lookup(number, 0, &ids)?);
        for (id, _, terminator, started) in &blocks {
            let from = ids[id];
            match terminator {
                Terminator::Jump(target) => {
                    let to = lookup(*started, *target, &ids)?;
                    cfg.connect(from, to);
                }
                Terminator::Branch(targets) => {
                    for target in targets {
                        let to = lookup(*started, *target, &ids)?;
                        cfg.connect(from, to);
                    }
                }
                Terminator::Return(_) => cfg.connect(from, exit),
            }
        }
        Ok(FunctionDef {
            name,
            signature,
            linkage,
            cfg,
        })
    }

    /// Resolve an operand: a local variable or an `@symbol` reference.
    fn variable(
        &mut self,
        number: usize,
        token: &str,
        variables: &mut VariableTable,
        names: &mut FxHashMap<String, Variable>,
    ) -> Result<Variable, IrError> {
        if let Some(variable) = names.get(token) {
            return Ok(*variable);
        }
        if let Some(symbol) = token.strip_prefix('@') {
            let ty = self
                .symbols
                .get(symbol)
                .cloned()
                .ok_or_else(|| IrError::UndefinedReference(symbol.to_string()))?;
            let variable = variables.add_symbol_ref(symbol, ty);
            names.insert(token.to_string(), variable);
            return Ok(variable);
        }
        Err(IrError::UndefinedReference(token.to_string()))
    }

    /// Parse `res : ty, ... = op operand, ...`.
    fn instruction(
        &mut self,
        number: usize,
        line: &str,
        variables: &mut VariableTable,
        names: &mut FxHashMap<String, Variable>,
    ) -> Result<Tac, IrError> {
        let (lhs, rhs) = line
            .split_once('=')
            .ok_or_else(|| invalid(number, "expected 'results = op operands'"))?;
        let mut results = Vec::new();
        for entry in split_list(lhs) {
            let (name, ty) = entry
                .split_once(':')
                .ok_or_else(|| invalid(number, "expected 'name : type' result"))?;
            let name = name.trim();
            let ty = parse_type(number, ty.trim())?;
            // Variables are assignable: a repeated definition reuses the
            // variable (at the same type) rather than shadowing it.
            let variable = match names.get(name) {
                Some(existing) => {
                    let declared = variables.ty(*existing);
                    if declared != &ty {
                        return Err(IrError::TypeMismatch {
                            expected: declared.clone(),
                            found: ty,
                        });
                    }
                    *existing
                }
                None => {
                    let variable = variables.add(name, ty);
                    names.insert(name.to_string(), variable);
                    variable
                }
            };
            results.push(variable);
        }

        let rhs = rhs.trim();
        let (op_token, operand_text) = match rhs.split_once(char::is_whitespace) {
            Some((op, rest)) => (op, rest.trim()),
            None => (rhs, ""),
        };
        let operand_tokens = split_list(operand_text);

        // Constants carry their literal where other operations have operands.
        if let Some(ty) = op_token.strip_prefix("const.") {
            let Type::Int { bits } = parse_type(number, ty)? else {
                return Err(invalid(number, "const requires an integer type"));
            };
            let literal = operand_tokens
                .first()
                .ok_or_else(|| invalid(number, "missing constant literal"))?
                .trim();
            let value = parse_int(number, literal, bits)?;
            return Ok(Tac::new(
                Operation::Constant(ConstantValue::Int { bits, value }),
                [],
                results,
            ));
        }
        if let Some(alts) = op_token.strip_prefix("ctlconst.") {
            let alternatives: u32 = alts
                .parse()
                .map_err(|_| invalid(number, "bad control arity"))?;
            let value: u32 = operand_tokens
                .first()
                .ok_or_else(|| invalid(number, "missing control literal"))?
                .trim()
                .parse()
                .map_err(|_| invalid(number, "bad control literal"))?;
            return Ok(Tac::new(
                Operation::Constant(ConstantValue::Control {
                    alternatives,
                    value,
                }),
                [],
                results,
            ));
        }
        if op_token == "match" {
            return self.match_instruction(number, &operand_tokens, results, variables, names);
        }

        let mut operands = Vec::with_capacity(operand_tokens.len());
        for token in &operand_tokens {
            operands.push(self.variable(number, token.trim(), variables, names)?);
        }

        let operation = self.operation(
            number,
            op_token,
            &operands,
            &results,
            variables,
        )?;
        Ok(Tac::new(operation, operands, results))
    }

    // p : ctl<2> = match c, 1:1, default:0
    fn match_instruction(
        &mut self,
        number: usize,
        tokens: &[String],
        results: Vec<Variable>,
        variables: &mut VariableTable,
        names: &mut FxHashMap<String, Variable>,
    ) -> Result<Tac, IrError> {
        let operand_token = tokens
            .first()
            .ok_or_else(|| invalid(number, "missing match operand"))?;
        let operand = self.variable(number, operand_token.trim(), variables, names)?;
        let Type::Int { bits } = *variables.ty(operand) else {
            return Err(invalid(number, "match operand must be an integer"));
        };
        let [result] = results.as_slice() else {
            return Err(invalid(number, "match defines exactly one result"));
        };
        let Type::Control { alternatives } = *variables.ty(*result) else {
            return Err(invalid(number, "match result must be a control type"));
        };
        let mut cases = Vec::new();
        let mut default = 0;
        for token in &tokens[1..] {
            let (value, alternative) = token
                .trim()
                .split_once(':')
                .ok_or_else(|| invalid(number, "expected 'value:alternative'"))?;
            let alternative: u32 = alternative
                .trim()
                .parse()
                .map_err(|_| invalid(number, "bad match alternative"))?;
            if value.trim() == "default" {
                default = alternative;
            } else {
                let value = parse_int(number, value.trim(), bits)?;
                cases.push((value, alternative));
            }
        }
        Ok(Tac::new(
            Operation::Match {
                bits,
                mapping: MatchMapping {
                    cases: cases.into(),
                    default,
                    alternatives,
                },
            },
            [operand],
            results,
        ))
    }

    fn operation(
        &mut self,
        number: usize,
        token: &str,
        operands: &[Variable],
        results: &[Variable],
        variables: &VariableTable,
    ) -> Result<Operation, IrError> {
        let (mnemonic, ty) = match token.split_once('.') {
            Some((mnemonic, ty)) => (mnemonic, Some(parse_type(number, ty)?)),
            None => (token, None),
        };
        let typed = |ty: Option<Type>| {
            ty.ok_or_else(|| invalid(number, format!("'{mnemonic}' requires a type suffix")))
        };
        let binary = |kind: BinaryKind, ty: Option<Type>| -> Result<Operation, IrError> {
            Ok(Operation::Binary(kind, typed(ty)?))
        };
        match mnemonic {
            "add" => binary(BinaryKind::Add, ty),
            "sub" => binary(BinaryKind::Sub, ty),
            "mul" => binary(BinaryKind::Mul, ty),
            "sdiv" => binary(BinaryKind::SDiv, ty),
            "udiv" => binary(BinaryKind::UDiv, ty),
            "srem" => binary(BinaryKind::SRem, ty),
            "urem" => binary(BinaryKind::URem, ty),
            "and" => binary(BinaryKind::And, ty),
            "or" => binary(BinaryKind::Or, ty),
            "xor" => binary(BinaryKind::Xor, ty),
            "shl" => binary(BinaryKind::Shl, ty),
            "lshr" => binary(BinaryKind::LShr, ty),
            "ashr" => binary(BinaryKind::AShr, ty),
            "eq" => binary(BinaryKind::Eq, ty),
            "ne" => binary(BinaryKind::Ne, ty),
            "slt" => binary(BinaryKind::SLt, ty),
            "sle" => binary(BinaryKind::SLe, ty),
            "sgt" => binary(BinaryKind::SGt, ty),
            "sge" => binary(BinaryKind::SGe, ty),
            "ult" => binary(BinaryKind::ULt, ty),
            "ule" => binary(BinaryKind::ULe, ty),
            "ugt" => binary(BinaryKind::UGt, ty),
            "uge" => binary(BinaryKind::UGe, ty),
            "neg" => Ok(Operation::Unary(UnaryKind::Neg, typed(ty)?)),
            "not" => Ok(Operation::Unary(UnaryKind::Not, typed(ty)?)),
            "copy" => Ok(Operation::Copy(typed(ty)?)),
            "undef" => Ok(Operation::Undef(typed(ty)?)),
            "alloca" => Ok(Operation::Alloca { pointee: typed(ty)? }),
            "malloc" => Ok(Operation::Malloc),
            "load" => Ok(Operation::Load {
                ty: typed(ty)?,
                nstates: operands.len().saturating_sub(1),
            }),
            "store" => Ok(Operation::Store {
                ty: typed(ty)?,
                nstates: operands.len().saturating_sub(2),
            }),
            "mux" => Ok(Operation::Mux {
                ninputs: operands.len(),
                noutputs: results.len(),
            }),
            "data" => Ok(Operation::DataMarker(typed(ty)?)),
            "call" => {
                let callee = operands
                    .first()
                    .ok_or_else(|| invalid(number, "call requires a callee"))?;
                match variables.ty(*callee) {
                    Type::Function(signature) => Ok(Operation::Call(signature.clone())),
                    other => Err(IrError::TypeMismatch {
                        expected: Type::Function(FunctionType::new([], [])),
                        found: other.clone(),
                    }),
                }
            }
            "testop" => {
                let inputs: Vec<Type> = operands
                    .iter()
                    .map(|v| variables.ty(*v).clone())
                    .collect();
                let outputs: Vec<Type> = results
                    .iter()
                    .map(|v| variables.ty(*v).clone())
                    .collect();
                Ok(Operation::Test {
                    inputs: inputs.into(),
                    outputs: outputs.into(),
                })
            }
            _ => Err(invalid(number, format!("unknown operation '{token}'"))),
        }
    }
}

fn parse_symbol(line: usize, token: &str) -> Result<String, IrError> {
    token
        .strip_prefix('@')
        .map(str::to_string)
        .ok_or_else(|| invalid(line, format!("expected '@name', found '{token}'")))
}

fn parse_linkage(line: usize, token: &str) -> Result<Linkage, IrError> {
    match token {
        "external" => Ok(Linkage::External),
        "internal" => Ok(Linkage::Internal),
        other => Err(invalid(line, format!("unknown linkage '{other}'"))),
    }
}

fn parse_int(line: usize, token: &str, bits: u32) -> Result<u64, IrError> {
    let value = if let Some(negative) = token.strip_prefix('-') {
        let magnitude: u64 = negative
            .parse()
            .map_err(|_| invalid(line, format!("bad integer '{token}'")))?;
        magnitude.wrapping_neg()
    } else {
        token
            .parse()
            .map_err(|_| invalid(line, format!("bad integer '{token}'")))?
    };
    let masked = if bits >= 64 {
        value
    } else {
        value & ((1u64 << bits) - 1)
    };
    Ok(masked)
}

/// Split a comma-separated list, honoring nesting in `<>`, `()`, `[]`, `{}`.
fn split_list(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '<' | '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            '>' | ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                if !current.trim().is_empty() {
                    parts.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Parse a type written without embedded spaces.
pub fn parse_type(line: usize, token: &str) -> Result<Type, IrError> {
    let token = token.trim();
    match token {
        "mem" => return Ok(Type::Memory),
        "io" => return Ok(Type::Io),
        "f16" => return Ok(Type::Float(rvopt_ir::FloatKind::Half)),
        "f32" => return Ok(Type::Float(rvopt_ir::FloatKind::Single)),
        "f64" => return Ok(Type::Float(rvopt_ir::FloatKind::Double)),
        _ => {}
    }
    if let Some(bits) = token.strip_prefix('i')
        && let Ok(bits) = bits.parse::<u32>()
    {
        return Ok(Type::Int { bits });
    }
    if let Some(inner) = token.strip_prefix("ctl<").and_then(|t| t.strip_suffix('>')) {
        let alternatives = inner
            .parse()
            .map_err(|_| invalid(line, format!("bad control type '{token}'")))?;
        return Ok(Type::Control { alternatives });
    }
    if let Some(inner) = token.strip_prefix("ptr<").and_then(|t| t.strip_suffix('>')) {
        return Ok(Type::pointer(parse_type(line, inner)?));
    }
    if let Some(inner) = token.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        let (element, len) = inner
            .rsplit_once(';')
            .ok_or_else(|| invalid(line, format!("bad array type '{token}'")))?;
        let len = len
            .trim()
            .parse()
            .map_err(|_| invalid(line, format!("bad array length in '{token}'")))?;
        return Ok(Type::Array {
            element: Arc::new(parse_type(line, element)?),
            len,
        });
    }
    if let Some(inner) = token.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
        let fields: Vec<Type> = split_list(inner)
            .into_iter()
            .map(|field| parse_type(line, &field))
            .collect::<Result<_, _>>()?;
        return Ok(Type::Struct(fields.into()));
    }
    if let Some(rest) = token.strip_prefix("fn(") {
        let (params, results) = rest
            .split_once(")->(")
            .and_then(|(p, r)| r.strip_suffix(')').map(|r| (p, r)))
            .ok_or_else(|| invalid(line, format!("bad function type '{token}'")))?;
        let params: Vec<Type> = split_list(params)
            .into_iter()
            .map(|t| parse_type(line, &t))
            .collect::<Result<_, _>>()?;
        let results: Vec<Type> = split_list(results)
            .into_iter()
            .map(|t| parse_type(line, &t))
            .collect::<Result<_, _>>()?;
        return Ok(Type::Function(FunctionType::new(params, results)));
    }
    Err(invalid(line, format!("unknown type '{token}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_types() {
        assert_eq!(parse_type(1, "i32").unwrap(), Type::I32);
        assert_eq!(
            parse_type(1, "ptr<i8>").unwrap(),
            Type::pointer(Type::I8)
        );
        assert_eq!(
            parse_type(1, "ctl<2>").unwrap(),
            Type::Control { alternatives: 2 }
        );
        assert!(matches!(
            parse_type(1, "fn(i32,i32)->(i32)").unwrap(),
            Type::Function(_)
        ));
        assert!(parse_type(1, "bogus").is_err());
    }

    #[test]
    fn parses_a_small_function() {
        let text = "\
module t
function @add(a : i32, b : i32) -> (i32) external {
block 0:
  c : i32 = add.i32 a, b
  return c
}
";
        let module = parse_module(text).unwrap();
        assert_eq!(module.functions.len(), 1);
        let f = &module.functions[0];
        assert_eq!(f.name, "add");
        assert_eq!(f.signature.params().len(), 2);
    }

    #[test]
    fn duplicate_return_is_rejected() {
        let text = "\
module t
function @f() -> (i32) external {
block 0:
  c : i32 = const.i32 1
  return c
block 1:
  d : i32 = const.i32 2
  return d
}
";
        assert!(parse_module(text).is_err());
    }
}
