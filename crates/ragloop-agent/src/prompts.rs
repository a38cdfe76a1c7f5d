//! Instruction templates for the grader, rewriter and answer generator.

/// Binary relevance check over retrieved docs.
pub fn grade(question: &str, context: &str) -> String {
    format!(
        "You are a grader assessing relevance of retrieved docs to a user question.\n\
         Here are the retrieved docs:\n\
         \n ------- \n\
         {context}\n\
         \n ------- \n\
         Here is the user question: {question}\n\
         If the content of the docs are relevant to the users question, score them as relevant.\n\
         Give a binary score 'yes' or 'no' score to indicate whether the docs are relevant to the question.\n\
         Yes: The docs are relevant to the question.\n\
         No: The docs are not relevant to the question."
    )
}

/// Restate the question's intent more precisely.
pub fn rewrite(question: &str) -> String {
    format!(
        "Look at the input and try to reason about the underlying semantic intent / meaning.\n\
         Here is the initial question:\n\
         \n ------- \n\
         {question}\n\
         \n ------- \n\
         Formulate an improved question:"
    )
}

/// Short answer grounded in the retrieved context.
pub fn generate(question: &str, context: &str) -> String {
    format!(
        "You are an assistant for question-answering tasks.\n\
         Use the following pieces of retrieved context to answer the question.\n\
         If you don't know the answer, just say that you don't know.\n\
         Use three sentences maximum and keep the answer concise.\n\
         Question: {question}\n\
         Context: {context}"
    )
}
