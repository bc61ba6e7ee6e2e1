//! Бинарный формат обмена матрицами
//!
//! `[rows: u32][cols: u32]`, затем `rows * cols` значений f32 в построчном
//! порядке. Все числа little-endian, без выравнивания, сигнатуры и
//! контрольной суммы: целостность файла проверяет вызывающий.

use super::types::{Matrix, Shape};
use crate::error::{ClError, Result};
use std::io::Write;
use std::path::Path;

pub const HEADER_LEN: usize = 8;

/// Кодирует матрицу в байты формата
pub fn encode(matrix: &Matrix) -> Vec<u8> {
    let shape = matrix.shape();
    let mut bytes = Vec::with_capacity(HEADER_LEN + matrix.byte_len());
    bytes.extend_from_slice(&shape.rows.to_le_bytes());
    bytes.extend_from_slice(&shape.cols.to_le_bytes());
    for value in matrix.data() {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Декодирует байты формата; `path` используется только в сообщениях об ошибках
pub fn decode(bytes: &[u8], path: &Path) -> Result<Matrix> {
    let malformed = |reason: String| ClError::Format {
        path: path.to_path_buf(),
        reason,
    };

    if bytes.len() < HEADER_LEN {
        return Err(malformed(format!(
            "file is {} bytes, shorter than the {}-byte header",
            bytes.len(),
            HEADER_LEN
        )));
    }
    let rows = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let cols = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let shape = Shape::new(rows, cols);

    let payload_len = shape
        .elements()
        .checked_mul(4)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| malformed(format!("shape {} is too large", shape)))?;
    let payload = &bytes[HEADER_LEN..];
    if payload.len() < payload_len {
        return Err(malformed(format!(
            "header declares shape {} ({} payload bytes), file has {}",
            shape,
            payload_len,
            payload.len()
        )));
    }
    if payload.len() > payload_len {
        log::warn!(
            "{}: {} лишних байт после данных матрицы проигнорированы",
            path.display(),
            payload.len() - payload_len
        );
    }

    let data = payload[..payload_len]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Matrix::new(shape, data)
}

/// Загружает матрицу из файла
pub fn load(path: &Path) -> Result<Matrix> {
    let bytes = std::fs::read(path).map_err(|source| ClError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let matrix = decode(&bytes, path)?;
    log::debug!("Загружена матрица {} из {}", matrix.shape(), path.display());
    Ok(matrix)
}

/// Записывает заголовок и данные; файл перезаписывается целиком
pub fn save(path: &Path, matrix: &Matrix) -> Result<()> {
    let io_error = |source| ClError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::File::create(path).map_err(io_error)?;
    file.write_all(&encode(matrix)).map_err(io_error)?;
    file.sync_all().map_err(io_error)?;
    log::debug!("Сохранена матрица {} в {}", matrix.shape(), path.display());
    Ok(())
}
