//! Разбор сигнатур ядер OpenCL C для хостовой среды выполнения
//!
//! Распознаются только объявления `__kernel void name(...) { ... }`; тело
//! ядра проверяется лишь на парность скобок. Сообщения об ошибках имеют вид
//! `<source>:line:col: error: ...`, как у компиляторов OpenCL.

use crate::backend::{scalar_width, ArgKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDecl {
    pub name: String,
    pub kind: ArgKind,
    pub is_const: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelDecl {
    pub name: String,
    pub params: Vec<ParamDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    text: String,
    line: usize,
    col: usize,
}

fn diagnostic(line: usize, col: usize, message: impl std::fmt::Display) -> String {
    format!("<source>:{}:{}: error: {}", line, col, message)
}

/// Разбивает исходник на идентификаторы, числа и одиночные знаки, пропуская комментарии
fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let (mut i, mut line, mut col) = (0usize, 1usize, 1usize);

    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            i += 1;
            line += 1;
            col = 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            col += 1;
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            let (start_line, start_col) = (line, col);
            i += 2;
            col += 2;
            loop {
                match chars.get(i) {
                    None => return Err(diagnostic(start_line, start_col, "unterminated /* comment")),
                    Some('*') if chars.get(i + 1) == Some(&'/') => {
                        i += 2;
                        col += 2;
                        break;
                    }
                    Some('\n') => {
                        i += 1;
                        line += 1;
                        col = 1;
                    }
                    Some(_) => {
                        i += 1;
                        col += 1;
                    }
                }
            }
            continue;
        }
        // Директивы препроцессора (#pragma, #define) не влияют на сигнатуры
        if c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        let start = i;
        if c.is_alphanumeric() || c == '_' {
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
        } else {
            i += 1;
        }
        let text: String = chars[start..i].iter().collect();
        tokens.push(Token { text, line, col });
        col += i - start;
    }
    Ok(tokens)
}

fn check_balance(tokens: &[Token]) -> Result<(), String> {
    let mut stack: Vec<&Token> = Vec::new();
    for token in tokens {
        match token.text.as_str() {
            "(" | "{" | "[" => stack.push(token),
            ")" | "}" | "]" => {
                let expected = match token.text.as_str() {
                    ")" => "(",
                    "}" => "{",
                    _ => "[",
                };
                match stack.pop() {
                    Some(open) if open.text == expected => {}
                    _ => {
                        return Err(diagnostic(
                            token.line,
                            token.col,
                            format!("extraneous closing '{}'", token.text),
                        ))
                    }
                }
            }
            _ => {}
        }
    }
    match stack.pop() {
        Some(open) => Err(diagnostic(
            open.line,
            open.col,
            format!("unmatched '{}'", open.text),
        )),
        None => Ok(()),
    }
}

const QUALIFIERS: [&str; 6] = ["const", "volatile", "restrict", "__private", "private", "__read_only"];

fn parse_param(tokens: &[Token]) -> Result<ParamDecl, String> {
    let first = &tokens[0];
    let words: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
    let name_token = tokens
        .last()
        .filter(|t| t.text.chars().all(|c| c.is_alphanumeric() || c == '_'))
        .ok_or_else(|| diagnostic(first.line, first.col, "expected parameter name"))?;
    let is_const = words.contains(&"const");

    if words.contains(&"*") {
        let kind = if words.iter().any(|w| matches!(*w, "__global" | "global" | "__constant" | "constant")) {
            ArgKind::Buffer
        } else if words.iter().any(|w| matches!(*w, "__local" | "local")) {
            ArgKind::Local
        } else {
            return Err(diagnostic(
                first.line,
                first.col,
                format!("kernel pointer argument '{}' must point to global, constant or local memory", name_token.text),
            ));
        };
        return Ok(ParamDecl {
            name: name_token.text.clone(),
            kind,
            is_const,
        });
    }

    let type_words: Vec<&str> = words[..words.len() - 1]
        .iter()
        .copied()
        .filter(|w| !QUALIFIERS.contains(w))
        .collect();
    if type_words.is_empty() {
        return Err(diagnostic(first.line, first.col, format!("missing type for parameter '{}'", name_token.text)));
    }
    let type_name = type_words.join(" ");
    let width = scalar_width(&type_name)
        .ok_or_else(|| diagnostic(first.line, first.col, format!("unknown type name '{}'", type_name)))?;

    Ok(ParamDecl {
        name: name_token.text.clone(),
        kind: ArgKind::Scalar {
            type_name,
            width: Some(width),
        },
        is_const,
    })
}

/// Пропускает группы `__attribute__((...))`, возвращает индекс следующего токена
fn skip_attributes(tokens: &[Token], mut i: usize) -> Result<usize, String> {
    while let Some(attr) = tokens.get(i).filter(|t| t.text == "__attribute__") {
        if tokens.get(i + 1).map(|t| t.text.as_str()) != Some("(") {
            return Err(diagnostic(attr.line, attr.col, "expected '(' after '__attribute__'"));
        }
        let mut depth = 0usize;
        i += 1;
        loop {
            match tokens.get(i).map(|t| t.text.as_str()) {
                Some("(") => depth += 1,
                Some(")") => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                Some(_) => {}
                None => return Err(diagnostic(attr.line, attr.col, "unterminated attribute")),
            }
            i += 1;
        }
        i += 1;
    }
    Ok(i)
}

/// Возвращает объявления ядер или текст лога сборки
pub fn parse_kernels(source: &str) -> Result<Vec<KernelDecl>, String> {
    let tokens = tokenize(source)?;
    check_balance(&tokens)?;

    let mut kernels: Vec<KernelDecl> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if !matches!(tokens[i].text.as_str(), "__kernel" | "kernel") {
            i += 1;
            continue;
        }
        let at = &tokens[i];
        let ret = skip_attributes(&tokens, i + 1)?;
        match tokens.get(ret) {
            Some(t) if t.text == "void" => {}
            _ => return Err(diagnostic(at.line, at.col, "kernel functions must return void")),
        }
        let name = tokens
            .get(ret + 1)
            .filter(|t| t.text.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_'))
            .ok_or_else(|| diagnostic(at.line, at.col, "expected kernel name"))?;
        match tokens.get(ret + 2) {
            Some(t) if t.text == "(" => {}
            _ => return Err(diagnostic(name.line, name.col, "expected '(' after kernel name")),
        }

        // Параметры до парной ')'
        let mut params = Vec::new();
        let mut current: Vec<Token> = Vec::new();
        let mut depth = 0usize;
        let mut j = ret + 3;
        loop {
            let token = &tokens[j];
            match token.text.as_str() {
                "(" => depth += 1,
                ")" if depth == 0 => break,
                ")" => depth -= 1,
                "," if depth == 0 => {
                    if current.is_empty() {
                        return Err(diagnostic(token.line, token.col, "expected parameter declarator"));
                    }
                    params.push(parse_param(&current)?);
                    current.clear();
                    j += 1;
                    continue;
                }
                _ => {}
            }
            current.push(token.clone());
            j += 1;
        }
        let only_void = current.len() == 1 && current[0].text == "void";
        if !current.is_empty() && !only_void {
            params.push(parse_param(&current)?);
        }

        match tokens.get(j + 1) {
            Some(t) if t.text == "{" => {}
            _ => {
                let close = &tokens[j];
                return Err(diagnostic(close.line, close.col, format!("expected function body for kernel '{}'", name.text)));
            }
        }
        if kernels.iter().any(|k| k.name == name.text) {
            return Err(diagnostic(name.line, name.col, format!("redefinition of '{}'", name.text)));
        }

        kernels.push(KernelDecl {
            name: name.text.clone(),
            params,
        });
        i = j + 1;
    }

    if kernels.is_empty() {
        return Err("error: no kernel functions found in program source".to_string());
    }
    Ok(kernels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::VECTOR_ADD_KERNEL;

    #[test]
    fn parses_vector_add_signature() {
        let kernels = parse_kernels(VECTOR_ADD_KERNEL).unwrap();
        assert_eq!(kernels.len(), 1);
        let kernel = &kernels[0];
        assert_eq!(kernel.name, "vectorAdd");
        assert_eq!(kernel.params.len(), 4);
        assert_eq!(kernel.params[0].kind, ArgKind::Buffer);
        assert!(kernel.params[0].is_const);
        assert!(kernel.params[1].is_const);
        assert!(!kernel.params[2].is_const);
        assert_eq!(
            kernel.params[3].kind,
            ArgKind::Scalar {
                type_name: "unsigned int".to_string(),
                width: Some(4)
            }
        );
    }

    #[test]
    fn skips_attributes_before_return_type() {
        let source = "__kernel __attribute__((reqd_work_group_size(64, 1, 1))) void f(__global float *a) {}\n\
                      kernel __attribute__((vec_type_hint(float4))) __attribute__((work_group_size_hint(8, 1, 1))) void g(uint n) {}\n";
        let kernels = parse_kernels(source).unwrap();
        assert_eq!(kernels.iter().map(|k| k.name.as_str()).collect::<Vec<_>>(), ["f", "g"]);
        assert_eq!(kernels[0].params[0].kind, ArgKind::Buffer);
        assert_eq!(kernels[1].params.len(), 1);
    }

    #[test]
    fn attribute_without_parentheses_is_diagnosed() {
        let log = parse_kernels("__kernel __attribute__ void f() {}").unwrap_err();
        assert!(log.starts_with("<source>:1:10: error: expected '(' after '__attribute__'"), "{log}");
    }

    #[test]
    fn reports_unmatched_brace_with_position() {
        let source = "__kernel void f(__global float* a)\n{\n    a[0] = 1.0f;\n";
        let log = parse_kernels(source).unwrap_err();
        assert!(log.starts_with("<source>:2:1: error: unmatched '{'"), "{log}");
    }

    #[test]
    fn rejects_unknown_scalar_type() {
        let source = "__kernel void f(__global float* a, const quux n) { }";
        let log = parse_kernels(source).unwrap_err();
        assert!(log.contains("unknown type name 'quux'"), "{log}");
    }

    #[test]
    fn rejects_source_without_kernels() {
        let log = parse_kernels("float helper(float x) { return x; }").unwrap_err();
        assert!(log.contains("no kernel functions"));
    }

    #[test]
    fn comments_and_pragmas_are_ignored() {
        let source = "#pragma OPENCL EXTENSION cl_khr_fp64 : enable\n\
                      /* block ( */ // line {\n\
                      kernel void g(global const double* x, local float* tile, ulong n) {}";
        let kernels = parse_kernels(source).unwrap();
        assert_eq!(kernels[0].name, "g");
        assert_eq!(kernels[0].params[1].kind, ArgKind::Local);
        assert_eq!(
            kernels[0].params[2].kind,
            ArgKind::Scalar {
                type_name: "ulong".to_string(),
                width: Some(8)
            }
        );
    }
}
